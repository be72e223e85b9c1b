use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// Index of a node in the working set
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub usize);

/// Index of a resource in the working set
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RscId(pub usize);

/// Index of an action in the working set; also the action's graph id
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ActionId(pub usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for RscId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Structural kind of a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum VariantKind {
    Native,
    Group,
    Clone,
    Master,
}

impl VariantKind {
    pub fn is_clone_like(self) -> bool {
        matches!(self, VariantKind::Clone | VariantKind::Master)
    }
}

/// Semantics of an ordering edge, as a set of flags.
///
/// With `first -> then`:
/// - `IMPLIES_LEFT`: a mandatory `then` makes `first` mandatory
/// - `IMPLIES_RIGHT`: a mandatory `first` makes `then` mandatory
/// - `RUNNABLE_LEFT`: an unrunnable `first` makes `then` unrunnable
///
/// An empty set only sequences the two actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct OrderType(u32);

impl OrderType {
    pub const OPTIONAL: OrderType = OrderType(0);
    pub const IMPLIES_LEFT: OrderType = OrderType(0x01);
    pub const IMPLIES_RIGHT: OrderType = OrderType(0x02);
    pub const RUNNABLE_LEFT: OrderType = OrderType(0x10);

    pub const MANDATORY: OrderType = OrderType(0x02 | 0x10);
    /// Stop then start of the same resource
    pub const RESTART: OrderType = OrderType(0x01 | 0x02 | 0x10);

    pub fn contains(self, other: OrderType) -> bool {
        other.0 != 0 && self.0 & other.0 == other.0
    }

    pub fn is_optional(self) -> bool {
        self.0 == 0
    }

    pub fn bits(self) -> u32 {
        self.0
    }
}

impl BitOr for OrderType {
    type Output = OrderType;

    fn bitor(self, rhs: OrderType) -> OrderType {
        OrderType(self.0 | rhs.0)
    }
}

impl BitOrAssign for OrderType {
    fn bitor_assign(&mut self, rhs: OrderType) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_optional() {
            return f.write_str("optional");
        }
        let names = [
            (Self::IMPLIES_LEFT, "implies_left"),
            (Self::IMPLIES_RIGHT, "implies_right"),
            (Self::RUNNABLE_LEFT, "runnable_left"),
        ];
        let parts: Vec<&str> = names
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        f.write_str(&parts.join("|"))
    }
}

/// One end of an ordering edge, stored on the other end
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionWrapper {
    pub action: ActionId,
    pub kind: OrderType,
}
