pub mod auto_notify;

pub use auto_notify::AutoNotifier;
