//! Service surface consumed by request handlers
//!
//! | Operation            | Success              | Errors                |
//! |----------------------|----------------------|-----------------------|
//! | `list`               | streams              |                       |
//! | `get`                | stream               | 404                   |
//! | `create`             | stream with ID       | 400, 500 start failed |
//! | `update`             | merged stream        | 400, 404, 500         |
//! | `delete`             | remaining streams    | 404                   |
//! | `replace_all`        | streams + report     | 400                   |
//! | `status`/`status_all`| runtime projection   | 404                   |
//! | `startup_failures`   | last reconcile fails |                       |

pub mod error;
pub mod service;

pub use error::ApiError;
pub use service::StreamService;
