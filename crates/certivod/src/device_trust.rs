/// Source of a device's trust score in [0, 1].
///
/// Scores outside that range, or NaN, are treated as untrusted by the fusion step.
pub trait DeviceTrustProvider: Send + Sync {
    fn score(&self, device_id: &str) -> f64;
}

/// Reports the same configured score for every device.
#[derive(Debug, Clone, Copy)]
pub struct FixedDeviceTrust(pub f64);

impl DeviceTrustProvider for FixedDeviceTrust {
    fn score(&self, _device_id: &str) -> f64 {
        self.0
    }
}
