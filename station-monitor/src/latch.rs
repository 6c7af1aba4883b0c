/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

/// Edge-triggered reporting of a persistent condition.
///
/// `trip` returns `true` only on the first call after construction or a
/// `clear`, so a missing location fix is logged once rather than on every
/// tick.
#[derive(Debug, Clone, Default)]
pub struct ReportLatch {
    tripped: bool,
}

impl ReportLatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trip(&mut self) -> bool {
        !std::mem::replace(&mut self.tripped, true)
    }

    /// Returns `true` if the latch was tripped.
    pub fn clear(&mut self) -> bool {
        std::mem::replace(&mut self.tripped, false)
    }

    pub fn is_tripped(&self) -> bool {
        self.tripped
    }
}
