use convoy_core::TenantId;

/// Marks messages that belong to exactly one tenant.
///
/// Subscribers use this to filter a shared stream down to a single tenant,
/// e.g. a per-tenant dead-letter alert channel.
pub trait TenantScoped {
    fn tenant_id(&self) -> &TenantId;

    /// True when the message belongs to `tenant`.
    fn belongs_to(&self, tenant: &TenantId) -> bool {
        self.tenant_id() == tenant
    }
}
