//! Operations that combine several frames.

use lf_core::{Block, CoreError};
use lf_expr::{UNNAMED_COLUMN_ID, global_ids};

use crate::{DataFrame, FrameError, FromBlock, Series, SharedClient};

fn stack<T: FromBlock>(
    blocks: &[Block],
    client: &SharedClient,
    ignore_index: bool,
) -> Result<T, FrameError> {
    let [first, rest @ ..] = blocks else {
        return Err(CoreError::InvalidArgument("no objects to concatenate".to_owned()).into());
    };
    T::from_block(first.concat(rest, ignore_index)?, client.clone())
}

/// Stack frames vertically, as `pd.concat(frames)`.
///
/// All frames must have the same columns in the same order. Rows keep their
/// order within each frame and frames follow one another. With
/// `ignore_index` the result gets a fresh positional index.
pub fn concat(frames: &[DataFrame], ignore_index: bool) -> Result<DataFrame, FrameError> {
    let Some(first) = frames.first() else {
        return Err(CoreError::InvalidArgument("no objects to concatenate".to_owned()).into());
    };
    let blocks = frames.iter().map(|frame| frame.block().clone()).collect::<Vec<_>>();
    stack(&blocks, first.client(), ignore_index)
}

/// Stack Series end to end. Differently named inputs lose their names.
pub fn concat_series(series: &[Series], ignore_index: bool) -> Result<Series, FrameError> {
    let Some(first) = series.first() else {
        return Err(CoreError::InvalidArgument("no objects to concatenate".to_owned()).into());
    };
    let blocks = if series.iter().all(|item| item.name() == first.name()) {
        series.iter().map(|item| item.block().clone()).collect::<Vec<_>>()
    } else {
        let name = global_ids().next_id(UNNAMED_COLUMN_ID);
        series
            .iter()
            .map(|item| item.rename(&name).map(|renamed| renamed.block().clone()))
            .collect::<Result<Vec<_>, _>>()?
    };
    stack(&blocks, first.client(), ignore_index)
}
