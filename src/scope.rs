use sqlx::{Postgres, QueryBuilder};

use crate::auth::{AuthUser, Role};

/// Row-level filter derived from the authenticated principal.
///
/// Every transaction read goes through the canonical join shape
/// (`transactions tr JOIN properties p ... LEFT JOIN tenants ten ...`) and
/// this descriptor narrows it to the rows the principal may see: a landlord
/// sees transactions on properties they own, a tenant sees transactions on
/// tenancies linked to their identity. The scope never touches rows itself;
/// it only appends the join-path predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessScope {
    Owner { user_id: String },
    Tenant { user_id: String },
}

impl AccessScope {
    pub fn for_user(user: &AuthUser) -> Self {
        match user.role {
            Role::Landlord => Self::Owner {
                user_id: user.id.clone(),
            },
            Role::Tenant => Self::Tenant {
                user_id: user.id.clone(),
            },
        }
    }

    /// Append ` AND <predicate>` restricting the canonical join to this scope.
    pub fn push_predicate(&self, query: &mut QueryBuilder<Postgres>) {
        match self {
            Self::Owner { user_id } => {
                query.push(" AND p.owner_id = ");
                query.push_bind(user_id.clone());
                query.push("::uuid");
            }
            Self::Tenant { user_id } => {
                query.push(" AND ten.user_id = ");
                query.push_bind(user_id.clone());
                query.push("::uuid");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::AccessScope;
    use crate::auth::{AuthUser, Role};
    use sqlx::{Postgres, QueryBuilder};

    fn rendered(scope: &AccessScope) -> String {
        let mut query = QueryBuilder::<Postgres>::new("SELECT 1 FROM t WHERE 1=1");
        scope.push_predicate(&mut query);
        query.sql().to_string()
    }

    #[test]
    fn owner_scope_filters_by_property_owner() {
        let scope = AccessScope::Owner {
            user_id: "a".to_string(),
        };
        let sql = rendered(&scope);
        assert!(sql.contains("p.owner_id = $1::uuid"), "got: {sql}");
        assert!(!sql.contains("ten.user_id"));
    }

    #[test]
    fn tenant_scope_filters_by_tenancy_link() {
        let scope = AccessScope::Tenant {
            user_id: "b".to_string(),
        };
        let sql = rendered(&scope);
        assert!(sql.contains("ten.user_id = $1::uuid"), "got: {sql}");
        assert!(!sql.contains("p.owner_id"));
    }

    #[test]
    fn scope_follows_role() {
        let landlord = AuthUser {
            id: "u1".to_string(),
            role: Role::Landlord,
        };
        let tenant = AuthUser {
            id: "u2".to_string(),
            role: Role::Tenant,
        };
        assert_eq!(
            AccessScope::for_user(&landlord),
            AccessScope::Owner {
                user_id: "u1".to_string()
            }
        );
        assert_eq!(
            AccessScope::for_user(&tenant),
            AccessScope::Tenant {
                user_id: "u2".to_string()
            }
        );
    }
}
