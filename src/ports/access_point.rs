/// Public hostnames configured per environment.
///
/// Acceptors without an explicit host read from here at match time, so a
/// hostname change needs no redeploy.
pub trait AccessPointRegistry: Send + Sync + 'static {
    fn hosts(&self, environment_id: &str) -> Vec<String>;
}
