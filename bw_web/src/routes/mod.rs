//! ABOUTME: Route modules mounted by create_app
//! ABOUTME: The JSON read API lives in api; observability routes come from bw_obs

pub mod api;
