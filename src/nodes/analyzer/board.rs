use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::RwLock;

/// One published magnitude spectrum.
#[derive(Clone, Debug, PartialEq)]
pub struct Spectrum {
    /// Bin center frequencies in Hz, ascending
    pub frequencies: Vec<f32>,
    /// Smoothed magnitudes in dB, one per frequency
    pub magnitudes_db: Vec<f32>,
    pub sample_rate: u32,
}

impl Spectrum {
    pub fn len(&self) -> usize {
        self.frequencies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frequencies.is_empty()
    }

    /// The loudest bin as `(frequency, dB)`. Bin 0 (DC) is skipped unless it is the only one.
    pub fn peak(&self) -> Option<(f32, f32)> {
        let skip = usize::from(self.len() > 1);
        self.frequencies
            .iter()
            .zip(&self.magnitudes_db)
            .skip(skip)
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(&f, &db)| (f, db))
    }
}

/// Latest spectra, keyed by the series key of the analyzer that produced them.
///
/// Series keys are unique per analyzer instance (see `SpectrumView::series_key`), so two
/// nodes sharing a display name never overwrite or remove each other's spectrum.
///
/// Workers publish, presentation code polls. Readers see the most recent complete
/// spectrum or nothing; a key appears only after its first successful pass.
#[derive(Clone, Default)]
pub struct SpectrumBoard {
    series: Arc<RwLock<HashMap<String, Arc<Spectrum>>>>,
}

impl SpectrumBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the spectrum under `key`.
    pub fn publish(&self, key: &str, spectrum: Spectrum) {
        let spectrum = Arc::new(spectrum);
        let mut series = self.series.write();
        match series.get_mut(key) {
            Some(slot) => *slot = spectrum,
            None => {
                series.insert(key.to_owned(), spectrum);
            }
        }
    }

    pub fn latest(&self, key: &str) -> Option<Arc<Spectrum>> {
        self.series.read().get(key).cloned()
    }

    pub fn remove(&self, key: &str) -> Option<Arc<Spectrum>> {
        self.series.write().remove(key)
    }

    /// Keys with a published spectrum, in no particular order.
    pub fn keys(&self) -> Vec<String> {
        self.series.read().keys().cloned().collect()
    }

    /// Published spectra whose analyzer is called `name`, ordered by series key.
    pub fn named(&self, name: &str) -> Vec<(String, Arc<Spectrum>)> {
        let mut found = self
            .series
            .read()
            .iter()
            .filter(|(key, _)| series_name(key) == name)
            .map(|(key, spectrum)| (key.clone(), Arc::clone(spectrum)))
            .collect::<Vec<_>>();
        found.sort_by(|a, b| a.0.cmp(&b.0));
        found
    }
}

/// Build the board key for analyzer number `serial` called `name`.
pub(crate) fn series_key(name: &str, serial: u64) -> String {
    format!("{name}#{serial}")
}

/// The analyzer name part of a series key.
fn series_name(key: &str) -> &str {
    key.rsplit_once('#').map_or(key, |(name, _)| name)
}

impl core::fmt::Debug for SpectrumBoard {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SpectrumBoard").field("keys", &self.keys()).finish()
    }
}
