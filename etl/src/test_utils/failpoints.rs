use fail::FailScenario;

/// Configures failpoints for the duration of a test.
///
/// Every configured failpoint is switched off again when the scenario is dropped, so a
/// failing assertion cannot leak an active failpoint into the next test.
pub struct FailpointScenario<'a> {
    _scenario: FailScenario<'a>,
    failpoints: Vec<String>,
}

impl<'a> FailpointScenario<'a> {
    /// Activates each `(name, action)` pair, using the `fail` crate action syntax.
    pub fn setup(failpoints: &[(&str, &str)]) -> FailpointScenario<'a> {
        let scenario = FailScenario::setup();

        for (name, action) in failpoints {
            fail::cfg(*name, action)
                .unwrap_or_else(|err| panic!("invalid failpoint action for '{name}': {err}"));
        }

        Self {
            _scenario: scenario,
            failpoints: failpoints
                .iter()
                .map(|(name, _)| name.to_string())
                .collect(),
        }
    }

    pub fn teardown(self) {
        drop(self);
    }
}

impl Drop for FailpointScenario<'_> {
    fn drop(&mut self) {
        for name in &self.failpoints {
            fail::remove(name);
        }
    }
}
