pub mod balance;
pub mod connect;
pub mod disconnect;
pub mod personas;
pub mod status;
