pub mod tracker_state;
