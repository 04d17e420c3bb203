// ABOUTME: Core data models for climbing wall routes sent as live previews

pub mod route;

pub use route::{Grade, Hand, Hold, HoldType, Problem, Route, RouteData, RouteWarning};
