use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Capability tags. They are only ever tested for membership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Permission {
    BsdCanRead,
    BsdCanList,
    BsdCanCreate,
    BsdCanUpdate,
    BsdCanDelete,
    BsdCanSignEmission,
    BsdCanSignWork,
    BsdCanSignTransport,
    BsdCanSignAcceptation,
    BsdCanSignOperation,
    BsdCanRevise,
    RegistryCanRead,
    RegistryCanImport,
    CompanyCanRead,
    CompanyCanUpdate,
    CompanyCanVerify,
    CompanyCanManageSignatureAutomation,
    CompanyCanManageMembers,
    CompanyCanRenewSecurityCode,
}

impl Permission {
    pub const ALL: [Permission; 19] = [
        Permission::BsdCanRead,
        Permission::BsdCanList,
        Permission::BsdCanCreate,
        Permission::BsdCanUpdate,
        Permission::BsdCanDelete,
        Permission::BsdCanSignEmission,
        Permission::BsdCanSignWork,
        Permission::BsdCanSignTransport,
        Permission::BsdCanSignAcceptation,
        Permission::BsdCanSignOperation,
        Permission::BsdCanRevise,
        Permission::RegistryCanRead,
        Permission::RegistryCanImport,
        Permission::CompanyCanRead,
        Permission::CompanyCanUpdate,
        Permission::CompanyCanVerify,
        Permission::CompanyCanManageSignatureAutomation,
        Permission::CompanyCanManageMembers,
        Permission::CompanyCanRenewSecurityCode,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Reader,
    Driver,
    Member,
    Admin,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::Reader, Role::Driver, Role::Member, Role::Admin];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Reader => "READER",
            Role::Driver => "DRIVER",
            Role::Member => "MEMBER",
            Role::Admin => "ADMIN",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "READER" => Ok(Role::Reader),
            "DRIVER" => Ok(Role::Driver),
            "MEMBER" => Ok(Role::Member),
            "ADMIN" => Ok(Role::Admin),
            other => Err(format!("unknown role {other}")),
        }
    }
}

const READER_GRANTS: &[Permission] = &[
    Permission::BsdCanRead,
    Permission::BsdCanList,
    Permission::CompanyCanRead,
    Permission::RegistryCanRead,
];

const DRIVER_EXTRA: &[Permission] = &[Permission::BsdCanSignTransport, Permission::BsdCanUpdate];

const MEMBER_EXTRA: &[Permission] = &[
    Permission::BsdCanCreate,
    Permission::BsdCanUpdate,
    Permission::BsdCanDelete,
    Permission::BsdCanSignEmission,
    Permission::BsdCanSignWork,
    Permission::BsdCanSignTransport,
    Permission::BsdCanSignAcceptation,
    Permission::BsdCanSignOperation,
    Permission::BsdCanRevise,
    Permission::RegistryCanImport,
];

const ADMIN_EXTRA: &[Permission] = &[
    Permission::CompanyCanUpdate,
    Permission::CompanyCanVerify,
    Permission::CompanyCanManageSignatureAutomation,
    Permission::CompanyCanManageMembers,
    Permission::CompanyCanRenewSecurityCode,
];

/// Static role → permission table. Each role's set is built additively from
/// the role below it plus that role's own extras.
#[derive(Debug, Clone)]
pub struct PermissionCatalog {
    reader: BTreeSet<Permission>,
    driver: BTreeSet<Permission>,
    member: BTreeSet<Permission>,
    admin: BTreeSet<Permission>,
}

impl Default for PermissionCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl PermissionCatalog {
    pub fn new() -> Self {
        let reader: BTreeSet<Permission> = READER_GRANTS.iter().copied().collect();
        let driver = extend(&reader, DRIVER_EXTRA);
        let member = extend(&reader, MEMBER_EXTRA);
        let admin = extend(&member, ADMIN_EXTRA);
        Self {
            reader,
            driver,
            member,
            admin,
        }
    }

    pub fn grants(&self, role: Role) -> &BTreeSet<Permission> {
        match role {
            Role::Reader => &self.reader,
            Role::Driver => &self.driver,
            Role::Member => &self.member,
            Role::Admin => &self.admin,
        }
    }

    pub fn can(&self, role: Role, permission: Permission) -> bool {
        self.grants(role).contains(&permission)
    }
}

fn extend(base: &BTreeSet<Permission>, extra: &[Permission]) -> BTreeSet<Permission> {
    base.iter().chain(extra.iter()).copied().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn arb_role() -> impl Strategy<Value = Role> {
        prop::sample::select(Role::ALL.to_vec())
    }

    fn arb_permission() -> impl Strategy<Value = Permission> {
        prop::sample::select(Permission::ALL.to_vec())
    }

    #[test]
    fn hierarchy_is_additive() {
        let catalog = PermissionCatalog::new();
        let reader = catalog.grants(Role::Reader);
        let driver = catalog.grants(Role::Driver);
        let member = catalog.grants(Role::Member);
        let admin = catalog.grants(Role::Admin);

        assert!(reader.is_subset(driver));
        assert!(reader.is_subset(member));
        assert!(member.is_subset(admin));
        assert!(member.len() < admin.len());
        assert!(reader.len() < driver.len());
    }

    #[test]
    fn only_admins_manage_members() {
        let catalog = PermissionCatalog::new();
        assert!(catalog.can(Role::Admin, Permission::CompanyCanManageMembers));
        assert!(!catalog.can(Role::Member, Permission::CompanyCanManageMembers));
        assert!(catalog.can(Role::Member, Permission::BsdCanRevise));
        assert!(!catalog.can(Role::Driver, Permission::BsdCanRevise));
        assert!(catalog.can(Role::Driver, Permission::BsdCanSignTransport));
        assert!(!catalog.can(Role::Reader, Permission::BsdCanUpdate));
    }

    #[test]
    fn parses_roles_case_insensitively() {
        assert_eq!("member".parse::<Role>(), Ok(Role::Member));
        assert_eq!(" ADMIN ".parse::<Role>(), Ok(Role::Admin));
        assert!("owner".parse::<Role>().is_err());
    }

    proptest! {
        #[test]
        fn can_matches_grants(role in arb_role(), permission in arb_permission()) {
            let catalog = PermissionCatalog::new();
            prop_assert_eq!(
                catalog.can(role, permission),
                catalog.grants(role).contains(&permission)
            );
        }

        #[test]
        fn reader_permissions_are_held_by_every_role(role in arb_role(), permission in arb_permission()) {
            let catalog = PermissionCatalog::new();
            if catalog.can(Role::Reader, permission) {
                prop_assert!(catalog.can(role, permission));
            }
            if catalog.can(Role::Member, permission) {
                prop_assert!(catalog.can(Role::Admin, permission));
            }
        }
    }
}
