use std::fmt;
use std::sync::Arc;

/// Identity used to tear down scheduled work and event subscriptions in bulk.
///
/// `Anonymous` stands for work registered without an owner, typically by the
/// engine itself. Plugins register everything under `Named(plugin_name)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum Owner {
    #[default]
    Anonymous,
    Named(Arc<str>),
}

impl Owner {
    pub fn named(name: impl Into<Arc<str>>) -> Self {
        Owner::Named(name.into())
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            Owner::Anonymous => None,
            Owner::Named(name) => Some(name),
        }
    }
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Owner::Anonymous => f.write_str("<anonymous>"),
            Owner::Named(name) => f.write_str(name),
        }
    }
}
