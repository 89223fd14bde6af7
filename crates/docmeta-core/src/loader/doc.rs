use std::path::Path;

use super::convert::{run_chain, DOC_CONVERTERS};
use super::{DocumentPage, LoadResult};

/// Legacy binary Word documents require an external conversion step. The
/// converters are tried in fixed preference order; the load fails only if
/// all of them are unavailable or error.
pub async fn load(path: &Path) -> LoadResult<Vec<DocumentPage>> {
    let text = run_chain(path, DOC_CONVERTERS).await?;
    Ok(vec![DocumentPage::new(text)])
}
