use trellis_core::CallResult;

/// Stand-in plugin that accepts every call and returns default values.
///
/// Used where a missing plugin should degrade an application instead of stopping it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NoopPlugin;

impl NoopPlugin {
    pub fn new() -> Self {
        Self
    }

    /// Always true: there is nothing to fail to load.
    pub fn is_loaded(&self) -> bool {
        true
    }

    pub fn call<R: Default, A>(&mut self, _name: &str, _args: A) -> CallResult<R> {
        Ok(R::default())
    }

    pub fn global<T: Default>(&self, _name: &str) -> CallResult<T> {
        Ok(T::default())
    }

    /// Accepted and discarded.
    pub fn set_global<T>(&mut self, _name: &str, _value: T) -> CallResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_noop_returns_defaults() {
        let mut plugin = NoopPlugin::new();
        assert!(plugin.is_loaded());
        assert_eq!(plugin.call::<i32, _>("anything", (1, 2.0)), Ok(0));
        assert_eq!(plugin.call::<String, _>("text", ()), Ok(String::new()));
        assert_eq!(plugin.call::<(), _>("void", ()), Ok(()));
        assert_eq!(plugin.global::<f64>("value"), Ok(0.0));
        assert_eq!(plugin.set_global("value", 3), Ok(()));
    }
}
