pub mod connection;
pub mod display;
pub mod endorsements;
pub mod entities;
pub mod error;
pub mod integrity;
pub mod links;
pub mod locations;
mod names;
pub mod pipeline;
pub mod provenance;
pub mod records;
pub mod schema;

pub use error::{Error, Result};
pub use names::{clean_applicants, clean_name};
