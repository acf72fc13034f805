//! Role-based PHI field access and log-safe query sanitization.

use std::collections::BTreeSet;
use std::sync::Arc;

use phi_query_core::{Error, Result, Role};

/// Placeholder written over PHI field names by [`AccessPolicy::sanitize_query`].
pub const PHI_PLACEHOLDER: &str = "[PHI_FIELD]";

/// Field names treated as PHI wherever they appear as column names.
///
/// Built once at startup and shared read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhiFieldRegistry {
    /// Configuration order, used for redaction.
    ordered: Vec<String>,
    lookup: BTreeSet<String>,
}

impl PhiFieldRegistry {
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut ordered = Vec::new();
        let mut lookup = BTreeSet::new();
        for field in fields {
            let field = field.into().trim().to_string();
            if !field.is_empty() && lookup.insert(field.clone()) {
                ordered.push(field);
            }
        }
        Self { ordered, lookup }
    }

    pub fn contains(&self, field: &str) -> bool {
        self.lookup.contains(field)
    }

    /// Registered fields present in `fields`.
    pub fn intersect<'a, I>(&self, fields: I) -> BTreeSet<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        fields
            .into_iter()
            .filter(|f| self.contains(f))
            .map(str::to_string)
            .collect()
    }

    pub fn fields(&self) -> &[String] {
        &self.ordered
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }
}

/// Access control over PHI columns.
#[derive(Debug, Clone)]
pub struct AccessPolicy {
    registry: Arc<PhiFieldRegistry>,
}

impl AccessPolicy {
    pub fn new(registry: Arc<PhiFieldRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &PhiFieldRegistry {
        &self.registry
    }

    /// Whether `role` may receive `requested_fields`.
    ///
    /// Requests without PHI fields are allowed for every role. A denial is
    /// logged at warning level only; recording an audit event is up to the
    /// caller.
    pub fn check_phi_access<'a, I>(&self, role: Role, requested_fields: I) -> bool
    where
        I: IntoIterator<Item = &'a str>,
    {
        let requested_phi = self.registry.intersect(requested_fields);
        if requested_phi.is_empty() || role.can_access_phi() {
            return true;
        }

        tracing::warn!(
            user_role = %role,
            requested_phi = ?requested_phi,
            "phi_access_denied"
        );
        metrics::counter!("phi_access_denied_total", "role" => role.as_str()).increment(1);
        false
    }

    /// Like [`check_phi_access`](Self::check_phi_access) but returns the
    /// denied fields as an error.
    pub fn authorize<'a, I>(&self, role: Role, requested_fields: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a str> + Clone,
    {
        if self.check_phi_access(role, requested_fields.clone()) {
            return Ok(());
        }
        Err(Error::AuthorizationDenied {
            role: role.to_string(),
            fields: self.registry.intersect(requested_fields).into_iter().collect(),
        })
    }

    /// Replace every literal occurrence of a registered field name with
    /// [`PHI_PLACEHOLDER`] so the statement can be logged.
    ///
    /// This is plain, case-sensitive substring replacement. It over-redacts
    /// (`name` inside `table_name` is replaced too) and it never touches PHI
    /// values embedded as literals, so it is a logging aid rather than a
    /// security boundary.
    pub fn sanitize_query(&self, sql: &str) -> String {
        self.registry
            .fields()
            .iter()
            .fold(sql.to_string(), |acc, field| acc.replace(field.as_str(), PHI_PLACEHOLDER))
    }
}
