//! Fan-out of pipeline state changes to every connected client.

mod router;

pub use router::NotificationRouter;
