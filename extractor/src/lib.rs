pub mod api;
pub mod app;
pub mod model;
pub mod normalize;
pub mod paginator;
pub mod pipeline;
pub mod secrets;
pub mod store;
pub mod window;

#[cfg(test)]
mod testing;
