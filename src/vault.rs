//! Secret store path helpers
//!
//! The controller never handles raw credentials. Collaborators receive
//! paths into the secret store and resolve them on their side.

/// Path for reading a Kubernetes secret through the secret store
pub fn path_for_reading_kube_secret(namespace: &str, secret_name: &str) -> String {
    format!("/v1/kubernetes-secrets/{secret_name}?namespace={namespace}")
}

/// Full address of a secret: store address plus the in-store path
pub fn credential_path(vault_address: &str, namespace: &str, secret_name: &str) -> String {
    format!(
        "{}{}",
        vault_address,
        path_for_reading_kube_secret(namespace, secret_name)
    )
}
