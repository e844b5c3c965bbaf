//! Module call builder
//!
//! A `ModuleCall` describes one invocation of an engine module: the module
//! name, its `key=value` options and its single-letter flags. The builder is
//! consumed by an [`Engine`](super::Engine) implementation, which turns it
//! into an actual process invocation (or records it, for the scripted
//! session used in tests).

use std::fmt;

/// One engine module invocation.
///
/// # Example
/// ```ignore
/// let call = ModuleCall::new("r.buffer")
///     .option("input", "holes")
///     .option("output", "buffer")
///     .option_list("distances", &[10.0, 20.0])
///     .option("units", "meters");
/// assert_eq!(call.to_string(), "r.buffer input=holes output=buffer distances=10,20 units=meters");
/// ```
#[derive(Debug, Clone)]
pub struct ModuleCall {
    module: String,
    options: Vec<(String, String)>,
    flags: String,
}

impl ModuleCall {
    pub fn new(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            options: Vec::new(),
            flags: String::new(),
        }
    }

    /// Add one `key=value` option.
    pub fn option(mut self, key: &str, value: impl ToString) -> Self {
        self.options.push((key.to_string(), value.to_string()));
        self
    }

    /// Add a comma-joined multi-value option.
    pub fn option_list<T: ToString>(mut self, key: &str, values: &[T]) -> Self {
        let joined = values
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(",");
        self.options.push((key.to_string(), joined));
        self
    }

    /// Add a single-letter flag.
    pub fn flag(mut self, flag: char) -> Self {
        self.flags.push(flag);
        self
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn flags(&self) -> &str {
        &self.flags
    }

    /// Value of the first option with the given key, if present.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.options
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Argument vector in the engine's `key=value` convention, flags last.
    pub fn to_args(&self) -> Vec<String> {
        let mut args: Vec<String> = self
            .options
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        if !self.flags.is_empty() {
            args.push(format!("-{}", self.flags));
        }
        args
    }
}

impl fmt::Display for ModuleCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.module)?;
        for arg in self.to_args() {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Shorthand for an `r.mapcalc` expression call.
pub fn mapcalc(expression: impl fmt::Display) -> ModuleCall {
    ModuleCall::new("r.mapcalc").option("expression", expression)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_options_in_order() {
        let call = ModuleCall::new("r.stats.zonal")
            .option("base", "clump")
            .option("cover", "filled")
            .option("method", "average")
            .option("output", "zonal");
        assert_eq!(
            call.to_string(),
            "r.stats.zonal base=clump cover=filled method=average output=zonal"
        );
    }

    #[test]
    fn joins_multi_values_and_flags() {
        let call = ModuleCall::new("r.buffer")
            .option("input", "holes")
            .option_list("distances", &[10.5, 21.0])
            .flag('q');
        assert_eq!(call.to_args(), vec!["input=holes", "distances=10.5,21", "-q"]);
        assert_eq!(call.get("distances"), Some("10.5,21"));
    }

    #[test]
    fn mapcalc_shorthand() {
        let call = mapcalc("holes = if(isnull(filled), 1, null())");
        assert_eq!(call.module(), "r.mapcalc");
        assert_eq!(
            call.get("expression"),
            Some("holes = if(isnull(filled), 1, null())")
        );
    }
}
