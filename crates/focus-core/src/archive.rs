//! Archive helpers shared by every storage backend.

use std::sync::Arc;

use futures::stream::{self, BoxStream, StreamExt};
use sha2::{Digest, Sha256};

use crate::models::{RawInteraction, UnprocessedCursor};
use crate::traits::ArchiveRepository;
use crate::{defaults, Result};

/// SHA-256 of the raw content, hex encoded.
pub fn content_hash(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

/// Lazy, restartable sequence of rows needing processing at `version_floor`.
///
/// Pages are fetched on demand with keyset pagination, so rows processed
/// while the stream is being consumed are simply not returned again and the
/// stream never skips rows it has not yet seen. Reading has no side effects.
pub fn unprocessed_stream(
    archive: Arc<dyn ArchiveRepository>,
    version_floor: i32,
) -> BoxStream<'static, Result<RawInteraction>> {
    unprocessed_stream_with_page_size(archive, version_floor, defaults::UNPROCESSED_PAGE_SIZE)
}

pub fn unprocessed_stream_with_page_size(
    archive: Arc<dyn ArchiveRepository>,
    version_floor: i32,
    page_size: i64,
) -> BoxStream<'static, Result<RawInteraction>> {
    let page_size = page_size.max(1);
    stream::unfold(
        (archive, None::<UnprocessedCursor>, false),
        move |(archive, cursor, done)| async move {
            if done {
                return None;
            }
            match archive
                .select_unprocessed_page(version_floor, cursor, page_size)
                .await
            {
                Ok(page) => {
                    let exhausted = (page.len() as i64) < page_size;
                    let next = page.last().map(UnprocessedCursor::from).or(cursor);
                    if page.is_empty() {
                        return None;
                    }
                    let items: Vec<Result<RawInteraction>> = page.into_iter().map(Ok).collect();
                    Some((stream::iter(items), (archive, next, exhausted)))
                }
                Err(e) => Some((stream::iter(vec![Err(e)]), (archive, cursor, true))),
            }
        },
    )
    .flatten()
    .boxed()
}
