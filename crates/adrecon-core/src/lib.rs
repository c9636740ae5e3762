pub mod aggregate;
pub mod amount;
pub mod attribution;
pub mod campaigns;
pub mod columns;
pub mod config;
pub mod crm;
pub mod date;
pub mod dedupe;
pub mod delta;
pub mod error;
pub mod funnel;
pub mod landing;
pub mod matcher;
pub mod negative;
pub mod pacing;
pub mod reconcile;
pub mod record;
pub mod rules;
pub mod series;
pub mod source;
pub mod window;

pub use error::CoreError;
