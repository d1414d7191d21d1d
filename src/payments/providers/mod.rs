pub mod mpesa;

pub use mpesa::{MpesaConfig, MpesaGateway};
