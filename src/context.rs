//! Module for host-supplied ambient state: activity context, clock, and
//! client identity.
use std::borrow::Cow;
use std::fmt;

/// Represents the mode the host game is currently in.
///
/// Procedures declare the contexts they are callable from; the dispatcher
/// rejects calls made from any other context before the target is invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActivityContext {
    /// Actively flying a vessel.
    Flight,
    /// The in-flight map view.
    MapView,
    /// The tracking station.
    TrackingStation,
    /// The vehicle assembly building editor.
    EditorVab,
    /// The spaceplane hangar editor.
    EditorSph,
}

impl fmt::Display for ActivityContext {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            ActivityContext::Flight => "Flight",
            ActivityContext::MapView => "MapView",
            ActivityContext::TrackingStation => "TrackingStation",
            ActivityContext::EditorVab => "EditorVab",
            ActivityContext::EditorSph => "EditorSph",
        })
    }
}

/// Represents the set of activity contexts a procedure may be called from.
#[derive(Debug, Clone, PartialEq)]
pub enum RequiredContext {
    /// Callable from any context.
    Any,
    /// Callable only from the listed contexts.
    In(Cow<'static, [ActivityContext]>),
}

impl RequiredContext {
    /// Returns whether the given ambient context satisfies this requirement.
    pub fn allows(&self, context: ActivityContext) -> bool {
        match self {
            RequiredContext::Any => true,
            RequiredContext::In(set) => set.contains(&context),
        }
    }
}

impl fmt::Display for RequiredContext {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RequiredContext::Any => f.write_str("any"),
            RequiredContext::In(set) => {
                let mut first = true;
                for context in set.iter() {
                    if !first {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", context)?;
                    first = false;
                }
                Ok(())
            }
        }
    }
}

/// Represents the identity of a connected client, assigned by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(pub u64);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "client {}", self.0)
    }
}

/// Trait for the ambient state the host supplies on every tick.
///
/// The server never caches what this trait returns; it reads the activity
/// context when gating a dispatch and the universal time when stamping a
/// response.
pub trait HostContext {
    /// Gets the host's current activity context.
    fn activity(&self) -> ActivityContext;

    /// Gets the current in-simulation time, in seconds.
    fn universal_time(&self) -> f64;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_allows_any_context_when_unrestricted() {
        assert!(RequiredContext::Any.allows(ActivityContext::EditorSph));
    }

    #[test]
    fn it_restricts_to_the_listed_contexts() {
        let required = RequiredContext::In(Cow::Borrowed(&[
            ActivityContext::Flight,
            ActivityContext::MapView,
        ]));

        assert!(required.allows(ActivityContext::Flight));
        assert!(required.allows(ActivityContext::MapView));
        assert!(!required.allows(ActivityContext::TrackingStation));
    }

    #[test]
    fn it_displays_the_context_list() {
        let required = RequiredContext::In(Cow::Borrowed(&[
            ActivityContext::Flight,
            ActivityContext::MapView,
        ]));

        assert_eq!(required.to_string(), "Flight, MapView");
        assert_eq!(RequiredContext::Any.to_string(), "any");
    }
}
