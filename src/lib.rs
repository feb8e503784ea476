pub mod api;
pub mod config;
pub mod dunning;
pub mod error;
pub mod gateway;
pub mod invoices;
pub mod models;
pub mod notify;
pub mod render;
pub mod routes;
pub mod scheduler;
pub mod store;
pub mod tax;

pub use api::AppContext;
pub use dunning::DunningManager;
pub use gateway::{PaymentRequest, PaymentResponse, PaymentRouter};
pub use invoices::InvoiceManager;
pub use scheduler::ScheduleProcessor;
