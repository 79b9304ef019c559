pub mod api;
pub mod authority;
pub mod http_authority;
pub mod script_authority;
