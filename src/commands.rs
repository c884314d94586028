pub mod recover;
pub mod status;
pub mod verify;
