pub mod ambiguity_service;
pub mod classifier_service;
pub mod migration_service;
pub mod plan_service;
pub mod progress_service;
pub mod reconcile_service;
pub mod scan_service;
