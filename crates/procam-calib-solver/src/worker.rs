use std::thread::{self, JoinHandle};

use log::debug;
use procam_calib_core::MeasurementSnapshot;

use crate::{CancelToken, ReprojectionFit, ReprojectionSolver, SolveError};

/// Reprojection solve running on its own thread.
///
/// The worker owns a [`MeasurementSnapshot`], so acquisition may keep
/// appending to the store while it runs. Dropping the handle detaches the
/// thread; call [`cancel`](Self::cancel) first to stop it early.
#[derive(Debug)]
pub struct SolveWorker {
    handle: JoinHandle<Result<ReprojectionFit, SolveError>>,
    cancel: CancelToken,
}

impl SolveWorker {
    pub fn spawn(solver: ReprojectionSolver, snapshot: MeasurementSnapshot) -> Self {
        let cancel = CancelToken::new();
        let token = cancel.clone();
        let handle = thread::spawn(move || {
            debug!("solve worker started on {} measurements", snapshot.len());
            let (cam, board) = snapshot.flatten();
            solver.solve_with_cancel(&cam, &board, &token)
        });
        Self { handle, cancel }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the result.
    pub fn join(self) -> Result<ReprojectionFit, SolveError> {
        self.handle.join().map_err(|_| SolveError::WorkerPanicked)?
    }
}
