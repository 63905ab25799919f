//! Learning rate scheduling for training
//!
//! Schedules follow the `transformers` `lr_scheduler_type` names. Warmup
//! always ramps linearly from zero to the base rate.

use instruct_ner_core::error::{Error, Result};

/// Names accepted by [`LrScheduleBuilder::from_name`]
pub const SCHEDULE_NAMES: [&str; 6] = [
    "linear",
    "cosine",
    "constant",
    "constant_with_warmup",
    "polynomial",
    "inverse_sqrt",
];

/// Base trait for learning rate schedules
pub trait LrSchedule: Send + Sync {
    /// Get the learning rate for a given optimizer step
    fn get_lr(&self, step: usize) -> f64;

    /// Rate before the first step
    fn lr(&self) -> f64 {
        self.get_lr(0)
    }
}

fn warmup_factor(step: usize, warmup_steps: usize) -> Option<f64> {
    (step < warmup_steps).then(|| step as f64 / warmup_steps.max(1) as f64)
}

/// Constant learning rate (no scheduling)
#[derive(Clone, Debug)]
pub struct ConstantLr {
    lr: f64,
}

impl ConstantLr {
    pub fn new(lr: f64) -> Self {
        Self { lr }
    }
}

impl LrSchedule for ConstantLr {
    fn get_lr(&self, _step: usize) -> f64 {
        self.lr
    }
}

/// Linear warmup followed by a constant learning rate
#[derive(Clone, Debug)]
pub struct WarmupLr {
    warmup_steps: usize,
    base_lr: f64,
}

impl WarmupLr {
    pub fn new(warmup_steps: usize, base_lr: f64) -> Self {
        Self { warmup_steps, base_lr }
    }
}

impl LrSchedule for WarmupLr {
    fn get_lr(&self, step: usize) -> f64 {
        self.base_lr * warmup_factor(step, self.warmup_steps).unwrap_or(1.0)
    }
}

/// Cosine decay to zero after warmup
#[derive(Clone, Debug)]
pub struct CosineAnnealingLr {
    warmup_steps: usize,
    max_steps: usize,
    base_lr: f64,
    num_cycles: f64,
}

impl CosineAnnealingLr {
    pub fn new(warmup_steps: usize, max_steps: usize, base_lr: f64) -> Self {
        Self {
            warmup_steps,
            max_steps,
            base_lr,
            num_cycles: 0.5,
        }
    }
}

impl LrSchedule for CosineAnnealingLr {
    fn get_lr(&self, step: usize) -> f64 {
        if let Some(factor) = warmup_factor(step, self.warmup_steps) {
            return self.base_lr * factor;
        }
        let decay_steps = self.max_steps.saturating_sub(self.warmup_steps).max(1);
        let progress = (step - self.warmup_steps) as f64 / decay_steps as f64;
        let factor = 0.5 * (1.0 + (std::f64::consts::PI * self.num_cycles * 2.0 * progress).cos());
        self.base_lr * factor.max(0.0)
    }
}

/// Linear decay to zero after warmup
#[derive(Clone, Debug)]
pub struct LinearDecayLr {
    warmup_steps: usize,
    max_steps: usize,
    base_lr: f64,
}

impl LinearDecayLr {
    pub fn new(warmup_steps: usize, max_steps: usize, base_lr: f64) -> Self {
        Self {
            warmup_steps,
            max_steps,
            base_lr,
        }
    }
}

impl LrSchedule for LinearDecayLr {
    fn get_lr(&self, step: usize) -> f64 {
        if let Some(factor) = warmup_factor(step, self.warmup_steps) {
            return self.base_lr * factor;
        }
        let decay_steps = self.max_steps.saturating_sub(self.warmup_steps).max(1);
        let remaining = self.max_steps.saturating_sub(step) as f64 / decay_steps as f64;
        self.base_lr * remaining.max(0.0)
    }
}

/// Polynomial decay from the base rate to `lr_end`
#[derive(Clone, Debug)]
pub struct PolynomialDecayLr {
    warmup_steps: usize,
    max_steps: usize,
    base_lr: f64,
    lr_end: f64,
    power: f64,
}

impl PolynomialDecayLr {
    pub fn new(warmup_steps: usize, max_steps: usize, base_lr: f64) -> Self {
        Self {
            warmup_steps,
            max_steps,
            base_lr,
            lr_end: 1e-7,
            power: 1.0,
        }
    }

    pub fn with_power(mut self, power: f64) -> Self {
        self.power = power;
        self
    }

    pub fn with_lr_end(mut self, lr_end: f64) -> Self {
        self.lr_end = lr_end;
        self
    }
}

impl LrSchedule for PolynomialDecayLr {
    fn get_lr(&self, step: usize) -> f64 {
        if let Some(factor) = warmup_factor(step, self.warmup_steps) {
            return self.base_lr * factor;
        }
        if step > self.max_steps {
            return self.lr_end;
        }
        let decay_steps = self.max_steps.saturating_sub(self.warmup_steps).max(1);
        let pct_remaining = 1.0 - (step - self.warmup_steps) as f64 / decay_steps as f64;
        (self.base_lr - self.lr_end) * pct_remaining.powf(self.power) + self.lr_end
    }
}

/// Inverse square root decay after warmup
#[derive(Clone, Debug)]
pub struct InvSqrtLr {
    warmup_steps: usize,
    base_lr: f64,
    timescale: usize,
}

impl InvSqrtLr {
    pub fn new(warmup_steps: usize, base_lr: f64) -> Self {
        let timescale = if warmup_steps > 0 { warmup_steps } else { 10_000 };
        Self {
            warmup_steps,
            base_lr,
            timescale,
        }
    }
}

impl LrSchedule for InvSqrtLr {
    fn get_lr(&self, step: usize) -> f64 {
        if let Some(factor) = warmup_factor(step, self.warmup_steps) {
            return self.base_lr * factor;
        }
        let shift = self.timescale - self.warmup_steps;
        self.base_lr / ((step + shift) as f64 / self.timescale as f64).sqrt()
    }
}

/// Builder for creating common schedules
pub struct LrScheduleBuilder {
    kind: LrScheduleKind,
}

enum LrScheduleKind {
    Constant { lr: f64 },
    Warmup { warmup_steps: usize, base_lr: f64 },
    Cosine { warmup_steps: usize, max_steps: usize, base_lr: f64 },
    Linear { warmup_steps: usize, max_steps: usize, base_lr: f64 },
    InvSqrt { warmup_steps: usize, base_lr: f64 },
    Polynomial { warmup_steps: usize, max_steps: usize, base_lr: f64, power: f64 },
}

impl LrScheduleBuilder {
    /// Create a constant learning rate schedule
    pub fn constant(lr: f64) -> Self {
        Self {
            kind: LrScheduleKind::Constant { lr },
        }
    }

    /// Create a warmup-then-constant schedule
    pub fn warmup(warmup_steps: usize, base_lr: f64) -> Self {
        Self {
            kind: LrScheduleKind::Warmup { warmup_steps, base_lr },
        }
    }

    /// Create a cosine annealing schedule
    pub fn cosine(warmup_steps: usize, max_steps: usize, base_lr: f64) -> Self {
        Self {
            kind: LrScheduleKind::Cosine { warmup_steps, max_steps, base_lr },
        }
    }

    /// Create a linear decay schedule
    pub fn linear(warmup_steps: usize, max_steps: usize, base_lr: f64) -> Self {
        Self {
            kind: LrScheduleKind::Linear { warmup_steps, max_steps, base_lr },
        }
    }

    /// Create an inverse sqrt schedule
    pub fn inv_sqrt(warmup_steps: usize, base_lr: f64) -> Self {
        Self {
            kind: LrScheduleKind::InvSqrt { warmup_steps, base_lr },
        }
    }

    /// Create a polynomial decay schedule
    pub fn polynomial(warmup_steps: usize, max_steps: usize, base_lr: f64, power: f64) -> Self {
        Self {
            kind: LrScheduleKind::Polynomial { warmup_steps, max_steps, base_lr, power },
        }
    }

    /// Pick a schedule by its `lr_scheduler_type` name
    pub fn from_name(name: &str, warmup_steps: usize, max_steps: usize, base_lr: f64) -> Result<Self> {
        let builder = match name {
            "linear" => Self::linear(warmup_steps, max_steps, base_lr),
            "cosine" => Self::cosine(warmup_steps, max_steps, base_lr),
            "constant" => Self::constant(base_lr),
            "constant_with_warmup" => Self::warmup(warmup_steps, base_lr),
            "polynomial" => Self::polynomial(warmup_steps, max_steps, base_lr, 1.0),
            "inverse_sqrt" => Self::inv_sqrt(warmup_steps, base_lr),
            other => {
                return Err(Error::Configuration(format!(
                    "unknown lr_scheduler_type '{}', expected one of {}",
                    other,
                    SCHEDULE_NAMES.join(", ")
                )))
            }
        };
        Ok(builder)
    }

    /// Build the schedule
    pub fn build(self) -> Box<dyn LrSchedule> {
        match self.kind {
            LrScheduleKind::Constant { lr } => Box::new(ConstantLr::new(lr)),
            LrScheduleKind::Warmup { warmup_steps, base_lr } => Box::new(WarmupLr::new(warmup_steps, base_lr)),
            LrScheduleKind::Cosine { warmup_steps, max_steps, base_lr } => {
                Box::new(CosineAnnealingLr::new(warmup_steps, max_steps, base_lr))
            }
            LrScheduleKind::Linear { warmup_steps, max_steps, base_lr } => {
                Box::new(LinearDecayLr::new(warmup_steps, max_steps, base_lr))
            }
            LrScheduleKind::InvSqrt { warmup_steps, base_lr } => Box::new(InvSqrtLr::new(warmup_steps, base_lr)),
            LrScheduleKind::Polynomial { warmup_steps, max_steps, base_lr, power } => {
                Box::new(PolynomialDecayLr::new(warmup_steps, max_steps, base_lr).with_power(power))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-12
    }

    #[test]
    fn test_constant_lr() {
        let schedule = ConstantLr::new(0.001);
        assert_eq!(schedule.get_lr(0), 0.001);
        assert_eq!(schedule.get_lr(1000), 0.001);
    }

    #[test]
    fn test_warmup_starts_from_zero() {
        let schedule = WarmupLr::new(100, 0.001);
        assert_eq!(schedule.get_lr(0), 0.0);
        assert!(close(schedule.get_lr(50), 0.0005));
        assert_eq!(schedule.get_lr(100), 0.001);
        assert_eq!(schedule.get_lr(200), 0.001);
    }

    #[test]
    fn test_linear_decay_lr() {
        let schedule = LinearDecayLr::new(10, 110, 0.001);
        assert!(close(schedule.get_lr(5), 0.0005));
        assert_eq!(schedule.get_lr(10), 0.001);
        assert!(close(schedule.get_lr(60), 0.0005));
        assert_eq!(schedule.get_lr(110), 0.0);
        assert_eq!(schedule.get_lr(500), 0.0);
    }

    #[test]
    fn test_cosine_annealing_lr() {
        let schedule = CosineAnnealingLr::new(100, 1100, 0.001);
        assert_eq!(schedule.get_lr(100), 0.001);
        assert!(close(schedule.get_lr(600), 0.0005));
        assert!(schedule.get_lr(1100) < 1e-12);
    }

    #[test]
    fn test_polynomial_ends_at_lr_end() {
        let schedule = PolynomialDecayLr::new(0, 100, 0.001).with_lr_end(1e-5);
        assert_eq!(schedule.get_lr(0), 0.001);
        assert!(close(schedule.get_lr(100), 1e-5));
        assert!(close(schedule.get_lr(1000), 1e-5));
    }

    #[test]
    fn test_inv_sqrt_lr() {
        let schedule = InvSqrtLr::new(100, 0.001);
        assert_eq!(schedule.get_lr(100), 0.001);
        assert!(close(schedule.get_lr(400), 0.0005));
    }

    #[test]
    fn test_from_name() {
        let schedule = LrScheduleBuilder::from_name("linear", 0, 10, 0.1).unwrap().build();
        assert!(close(schedule.get_lr(5), 0.05));

        let schedule = LrScheduleBuilder::from_name("constant", 50, 10, 0.1).unwrap().build();
        assert_eq!(schedule.get_lr(0), 0.1);

        for name in SCHEDULE_NAMES {
            assert!(LrScheduleBuilder::from_name(name, 1, 10, 0.1).is_ok());
        }
        assert!(matches!(
            LrScheduleBuilder::from_name("cyclic", 1, 10, 0.1),
            Err(Error::Configuration(_))
        ));
    }
}
