//! Radio coloration hook
//!
//! Tone shaping per modulation (AM crush, FM hiss) is intentionally
//! disabled: replay favors voice clarity over radio realism. The hook
//! stays in the pipeline so coloration can be reintroduced without
//! touching the decode stage.

use crate::packet::Modulation;

/// Per-modulation coloration pass, currently a pass-through
#[derive(Debug, Clone, Default)]
pub struct RadioEffect {
    enabled: bool,
}

impl RadioEffect {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Apply coloration in place. Disabled by default; when enabled it is
    /// still an identity pass until a shaping chain is wired in.
    pub fn process(&self, _modulation: Modulation, samples: &mut [f32]) {
        if !self.enabled {
            return;
        }
        let _ = samples;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_passthrough_preserves_samples() {
        let effect = RadioEffect::new();
        let mut samples = vec![0.25f32, -0.5, 0.75];
        let original = samples.clone();
        effect.process(Modulation::Am, &mut samples);
        assert_eq!(samples, original);
    }
}
