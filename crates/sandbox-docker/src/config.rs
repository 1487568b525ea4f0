/// Engine-wide settings applied to every container this engine creates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DockerConfig {
    /// OCI runtime name passed to the daemon (e.g. "runc"); `None` uses the
    /// daemon default.
    pub runtime: Option<String>,
}
