pub use server::{router, run_with_listener, ServerState};

mod server;
