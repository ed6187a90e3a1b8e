pub mod catalog_service;
pub mod plan_service;
