use std::sync::Arc;

use crate::{
    auth::jwt::JwtService,
    config::AppConfig,
    db::PgPool,
    documents::{DocumentRepository, DocumentService, FamilyRegistry},
    membership::{MembershipService, MembershipStore},
    permissions::{AccessChecker, CacheStore, PermissionCatalog, RoleCache, RoleSource},
    repository::PgRepository,
    revision::{RevisionRepository, RevisionService},
};

/// Storage collaborators the services are wired to.
#[derive(Clone)]
pub struct Repositories {
    pub roles: Arc<dyn RoleSource>,
    pub documents: Arc<dyn DocumentRepository>,
    pub revisions: Arc<dyn RevisionRepository>,
    pub memberships: Arc<dyn MembershipStore>,
}

impl Repositories {
    pub fn postgres(pool: PgPool) -> Self {
        Self::shared(Arc::new(PgRepository::new(pool)))
    }

    /// One backend serving every contract.
    pub fn shared<R>(repo: Arc<R>) -> Self
    where
        R: RoleSource + DocumentRepository + RevisionRepository + MembershipStore,
    {
        Self {
            roles: repo.clone(),
            documents: repo.clone(),
            revisions: repo.clone(),
            memberships: repo,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub jwt: JwtService,
    pub access: AccessChecker,
    pub documents: DocumentService,
    pub revisions: RevisionService,
    pub memberships: MembershipService,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        jwt: JwtService,
        repos: Repositories,
        cache: Arc<dyn CacheStore>,
    ) -> Self {
        let role_cache = Arc::new(RoleCache::new(repos.roles, cache, config.role_cache_ttl));
        let access = AccessChecker::new(PermissionCatalog::new(), role_cache);
        let documents = DocumentService::new(
            access.clone(),
            Arc::new(FamilyRegistry::builtin()),
            repos.documents,
        );
        let revisions = RevisionService::new(access.clone(), documents.clone(), repos.revisions);
        let memberships = MembershipService::new(access.clone(), repos.memberships);

        Self {
            config: Arc::new(config),
            jwt,
            access,
            documents,
            revisions,
            memberships,
        }
    }
}
