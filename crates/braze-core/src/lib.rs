//! # Braze Core
//!
//! Foundation crate for the Braze bot host: the event model, the gateway
//! boundary, and the API types shared by the runtime and by gateway
//! implementations.
//!
//! The crate deliberately knows nothing about plugins. It defines *what*
//! flows through the host (events, API calls, results); the plugin runtime
//! in `braze-runtime` decides *where* it flows.

pub mod api;
pub mod context;
pub mod error;
pub mod event;
pub mod gateway;

pub use api::{FriendInfo, GroupMemberInfo, GroupRole, LoginInfo, MessageReceipt};
pub use context::EventCtx;
pub use error::{ApiError, ApiResult};
pub use event::{
    EventKind, GatewayEvent, MessageEvent, MessageScope, NoticeEvent, RequestEvent, RequestScope,
    Sender,
};
pub use gateway::{EventSink, Gateway};
