// HTTP API routes
//
// Each submodule handles one resource; shared DTOs live in `common`.

pub mod common;
pub mod error;
pub mod events;
pub mod extract;
pub mod owner;

pub use common::{ErrorResponse, ListResponse};
pub use error::ApiError;
pub use extract::{ApiJson, ApiQuery};
pub use owner::{Owner, OWNER_HEADER};
