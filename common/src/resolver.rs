/// The four inputs the effective mode is derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signals {
    pub schedule_active: bool,
    pub input_is_active: bool,
    pub forced_setback: bool,
    pub controller_active: bool,
}

impl Default for Signals {
    fn default() -> Self {
        Self {
            schedule_active: false,
            input_is_active: false,
            forced_setback: false,
            controller_active: true,
        }
    }
}

impl Signals {
    pub fn resolve(&self) -> bool {
        resolve(
            self.schedule_active,
            self.input_is_active,
            self.forced_setback,
            self.controller_active,
        )
    }
}

/// An inactive controller never holds setback; otherwise any trigger is enough.
pub fn resolve(
    schedule_active: bool,
    input_is_active: bool,
    forced_setback: bool,
    controller_active: bool,
) -> bool {
    controller_active && (schedule_active || input_is_active || forced_setback)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_truth_table() {
        // (schedule, input, forced, active) -> setback
        let rows = [
            (false, false, false, true, false),
            (true, false, false, true, true),
            (false, true, false, true, true),
            (true, true, false, true, true),
            (false, false, true, true, true),
            (true, false, true, true, true),
            (false, true, true, true, true),
            (true, true, true, true, true),
        ];
        for (schedule, input, forced, active, expected) in rows {
            assert_eq!(
                resolve(schedule, input, forced, active),
                expected,
                "schedule={schedule} input={input} forced={forced} active={active}"
            );
        }

        for bits in 0u8..8 {
            let (schedule, input, forced) = (bits & 1 != 0, bits & 2 != 0, bits & 4 != 0);
            assert!(!resolve(schedule, input, forced, false));
        }
    }

    #[test]
    fn inactive_controller_overrides_every_trigger() {
        assert!(!resolve(true, true, true, false));
    }

    #[test]
    fn default_signals_resolve_to_normal() {
        assert!(!Signals::default().resolve());
        assert!(Signals {
            forced_setback: true,
            ..Signals::default()
        }
        .resolve());
    }
}
