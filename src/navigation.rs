use serde::{Deserialize, Serialize};

use crate::entities::{Reference, ReferenceKind};
use crate::views::Chip;

/// Where a "view" action would go. Producing one never navigates.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ViewTarget {
    pub kind: ReferenceKind,
    pub id: String,
}

/// Opens detail presentations. Injected by the surface that owns the dialogs.
pub trait Navigator {
    fn open(&mut self, target: &ViewTarget, prefetched: Option<&Reference>);
}

/// Handles a click on a chip. String outputs have no target and do nothing.
pub fn view_chip(chip: &Chip, navigator: &mut dyn Navigator) -> bool {
    match &chip.view_target {
        Some(target) => {
            navigator.open(target, None);
            true
        }
        None => false,
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    #[derive(Default)]
    pub struct RecordingNavigator {
        pub opened: Vec<ViewTarget>,
    }

    impl Navigator for RecordingNavigator {
        fn open(&mut self, target: &ViewTarget, _prefetched: Option<&Reference>) {
            self.opened.push(target.clone());
        }
    }
}
