use anyhow::{bail, Context, Result};
use std::path::Path;

/// A data provider (MSO): short code used in summaries, name used in object keys.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Provider {
    pub code: String,
    pub name: String,
}

impl Provider {
    pub fn new(code: impl Into<String>, name: impl Into<String>) -> Self {
        Self { code: code.into(), name: name.into() }
    }
}

/// Ordered provider table. Indices into it are the provider keys used by the merge
/// and the reporter.
#[derive(Clone, Debug, Default)]
pub struct ProviderList {
    providers: Vec<Provider>,
}

impl ProviderList {
    pub fn new(providers: Vec<Provider>) -> Self {
        Self { providers }
    }

    pub fn len(&self) -> usize { self.providers.len() }
    pub fn is_empty(&self) -> bool { self.providers.is_empty() }
    pub fn get(&self, idx: usize) -> Option<&Provider> { self.providers.get(idx) }
    pub fn iter(&self) -> impl Iterator<Item = &Provider> { self.providers.iter() }
}

/// Load `code,name` rows (no header, leading spaces trimmed) from a CSV file.
pub fn load_providers(path: &Path) -> Result<ProviderList> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .trim(csv::Trim::All)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("open provider list {}", path.display()))?;

    let mut providers = Vec::new();
    for (i, row) in rdr.records().enumerate() {
        let row = row.with_context(|| format!("read provider list {}", path.display()))?;
        if row.iter().all(|f| f.is_empty()) {
            continue;
        }
        if row.len() < 2 || row[0].is_empty() || row[1].is_empty() {
            bail!("{}: line {} must be `code,name`", path.display(), i + 1);
        }
        providers.push(Provider::new(&row[0], &row[1]));
    }
    if providers.is_empty() {
        bail!("provider list {} is empty", path.display());
    }
    tracing::debug!("Loaded {} providers from {}", providers.len(), path.display());
    Ok(ProviderList::new(providers))
}
