pub mod catalog;
pub mod checker;
pub mod role_cache;

pub use catalog::{Permission, PermissionCatalog, Role};
pub use checker::AccessChecker;
pub use role_cache::{CacheStore, InMemoryCacheStore, RoleCache, RoleSource, UserRoles};
