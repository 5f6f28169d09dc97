pub mod arduino_app;
pub mod descriptor;
pub mod generator;
pub mod id;
pub mod manager;
