use super::joint::PoseFrame;
use crate::error::PoseError;

/// Turns one image frame into a fixed-size joint set.
///
/// `Ok(None)` means nobody was detected; callers zero-fill rather than drop
/// the frame.
pub trait PoseExtractor<F> {
    fn extract(&mut self, frame: &F) -> Result<Option<PoseFrame>, PoseError>;

    fn num_joints(&self) -> usize;
}

impl<F, E: PoseExtractor<F> + ?Sized> PoseExtractor<F> for &mut E {
    fn extract(&mut self, frame: &F) -> Result<Option<PoseFrame>, PoseError> {
        (**self).extract(frame)
    }

    fn num_joints(&self) -> usize {
        (**self).num_joints()
    }
}

impl<F, E: PoseExtractor<F> + ?Sized> PoseExtractor<F> for Box<E> {
    fn extract(&mut self, frame: &F) -> Result<Option<PoseFrame>, PoseError> {
        (**self).extract(frame)
    }

    fn num_joints(&self) -> usize {
        (**self).num_joints()
    }
}
