pub mod error;
pub mod inpaint;
pub mod routes;
pub mod server;
pub mod system;
