//! Hardware backend selection.
//!
//! A network can run on a *combination* of cooperating hardware backends (for example an NPU with
//! GPU fallback for unsupported operations), or on the CPU alone, which is the empty combination.
//! [`resolve`] walks a prioritized list of combinations and picks the first one that can be fully
//! constructed and for which an engine can be built.

use std::{
    collections::HashMap,
    env::{self, VarError},
    fmt,
    sync::OnceLock,
};

use itertools::Itertools;
use serde::Deserialize;

use super::tensor::ElementType;

/// A kind of hardware acceleration backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Neural accelerator running floating-point (fp16) networks.
    Npu,
    /// Neural accelerator running 8-bit quantized networks.
    NpuQuantized,
    Gpu,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BackendKind::Npu => "npu",
            BackendKind::NpuQuantized => "npu_quantized",
            BackendKind::Gpu => "gpu",
        })
    }
}

/// A set of cooperating backends. The empty combination means "CPU only".
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(transparent)]
pub struct Combination(Vec<BackendKind>);

impl Combination {
    pub fn new<I: IntoIterator<Item = BackendKind>>(kinds: I) -> Self {
        Self(kinds.into_iter().collect())
    }

    /// The CPU-only combination.
    pub fn cpu() -> Self {
        Self(Vec::new())
    }

    pub fn kinds(&self) -> &[BackendKind] {
        &self.0
    }

    pub fn is_cpu(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Combination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_cpu() {
            f.write_str("[cpu]")
        } else {
            write!(f, "[{}]", self.0.iter().join("+"))
        }
    }
}

/// A prioritized list of backend [`Combination`]s.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct BackendPriority(Vec<Combination>);

impl BackendPriority {
    pub fn new<I: IntoIterator<Item = Combination>>(combinations: I) -> Self {
        Self(combinations.into_iter().collect())
    }

    /// Returns the default priority list for a network taking inputs of `element_type`.
    ///
    /// Quantized networks prefer the quantized accelerator, floating-point networks the fp16 one.
    /// Both fall back to the GPU, and then to the CPU.
    pub fn for_element_type(element_type: ElementType) -> Self {
        let npu = match element_type {
            ElementType::F32 => BackendKind::Npu,
            ElementType::U8 => BackendKind::NpuQuantized,
        };
        Self(vec![
            Combination::new([npu, BackendKind::Gpu]),
            Combination::new([BackendKind::Gpu]),
            Combination::cpu(),
        ])
    }

    pub fn combinations(&self) -> &[Combination] {
        &self.0
    }
}

impl fmt::Display for BackendPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.iter().join(", "))
    }
}

/// Restriction of backend selection via the `HANDSIGN_BACKEND` environment variable.
#[derive(Debug, Clone, PartialEq, Eq)]
enum BackendOverride {
    Auto,
    Cpu,
    Invalid(String),
}

static OVERRIDE: OnceLock<BackendOverride> = OnceLock::new();

fn backend_override() -> &'static BackendOverride {
    OVERRIDE.get_or_init(|| {
        let value = match env::var("HANDSIGN_BACKEND").as_deref() {
            Ok("auto") | Err(VarError::NotPresent) => BackendOverride::Auto,
            Ok("cpu") => BackendOverride::Cpu,
            Ok(invalid) => BackendOverride::Invalid(invalid.to_string()),
            Err(VarError::NotUnicode(s)) => {
                BackendOverride::Invalid(s.to_string_lossy().into_owned())
            }
        };
        log::debug!("backend selection: {:?}", value);
        value
    })
}

/// Constructs backend delegates and engines bound to them.
pub trait BackendProvider {
    /// Handle to a constructed backend. Dropping it releases the backend.
    type Handle;
    type Engine;

    /// Constructs the backend of the given kind.
    fn create_delegate(&mut self, kind: BackendKind) -> anyhow::Result<Self::Handle>;

    /// Builds the numeric engine bound to exactly `delegates`.
    ///
    /// An empty `delegates` list requests the CPU engine.
    fn build_engine(&mut self, delegates: &[&Self::Handle]) -> anyhow::Result<Self::Engine>;
}

/// Outcome of constructing the members of one combination.
pub enum Attempt<'a, H> {
    /// All members were constructed.
    Success(Vec<&'a H>),
    /// This member could not be constructed (now or in an earlier attempt).
    UnsupportedCombination(BackendKind),
}

/// The engine built by [`resolve`], together with the delegates it is bound to.
///
/// The engine should be dropped before the delegates.
pub struct Resolved<P: BackendProvider> {
    pub engine: P::Engine,
    pub delegates: Vec<P::Handle>,
    pub combination: Combination,
}

/// Constructed (`Some`) or failed (`None`) delegates, by kind. Every kind is attempted once.
struct DelegateCache<H>(HashMap<BackendKind, Option<H>>);

impl<H> DelegateCache<H> {
    fn attempt<P>(&mut self, provider: &mut P, combination: &Combination) -> Attempt<'_, H>
    where
        P: BackendProvider<Handle = H>,
    {
        for &kind in combination.kinds() {
            let handle = self.0.entry(kind).or_insert_with(|| match provider.create_delegate(kind) {
                Ok(handle) => {
                    log::debug!("constructed {kind} backend");
                    Some(handle)
                }
                Err(e) => {
                    log::debug!("failed to construct {kind} backend: {e:#}");
                    None
                }
            });
            if handle.is_none() {
                return Attempt::UnsupportedCombination(kind);
            }
        }

        // Every member is now known to be constructed.
        let handles = combination
            .kinds()
            .iter()
            .filter_map(|kind| self.0.get(kind)?.as_ref())
            .collect();
        Attempt::Success(handles)
    }

    fn take(&mut self, combination: &Combination) -> Vec<H> {
        combination
            .kinds()
            .iter()
            .filter_map(|kind| self.0.remove(kind).flatten())
            .collect()
    }
}

impl<H> Drop for DelegateCache<H> {
    fn drop(&mut self) {
        for (kind, handle) in self.0.drain() {
            if let Some(handle) = handle {
                log::debug!("releasing unused {kind} backend");
                drop(handle);
            }
        }
    }
}

/// Picks the first combination in `priority` that can be constructed and builds its engine.
///
/// Every backend kind is constructed at most once, and the outcome is reused by later
/// combinations. Constructed backends that don't end up being used are released before this
/// function returns.
///
/// If the `HANDSIGN_BACKEND` environment variable is set to `cpu`, only the CPU-only combination
/// is considered.
///
/// Returns an error if no combination succeeds. Callers should end `priority` with the CPU-only
/// combination to make resolution infallible for any network the CPU engine supports.
pub fn resolve<P: BackendProvider>(
    provider: &mut P,
    priority: &BackendPriority,
) -> anyhow::Result<Resolved<P>> {
    let cpu_only = [Combination::cpu()];
    let combinations = match backend_override() {
        BackendOverride::Auto => priority.combinations(),
        BackendOverride::Cpu => &cpu_only[..],
        BackendOverride::Invalid(value) => {
            anyhow::bail!("invalid value set for `HANDSIGN_BACKEND` variable: '{value}'")
        }
    };
    resolve_from(provider, combinations)
}

fn resolve_from<P: BackendProvider>(
    provider: &mut P,
    combinations: &[Combination],
) -> anyhow::Result<Resolved<P>> {
    if !combinations.iter().any(Combination::is_cpu) {
        log::warn!(
            "backend priority list {} has no CPU-only fallback",
            BackendPriority::new(combinations.iter().cloned())
        );
    }

    let mut cache = DelegateCache(HashMap::new());
    for combination in combinations {
        let handles = match cache.attempt(provider, combination) {
            Attempt::Success(handles) => handles,
            Attempt::UnsupportedCombination(kind) => {
                log::debug!("skipping {combination}: {kind} backend is unavailable");
                continue;
            }
        };

        match provider.build_engine(&handles) {
            Ok(engine) => {
                log::debug!("using backend combination {combination}");
                let delegates = cache.take(combination);
                return Ok(Resolved {
                    engine,
                    delegates,
                    combination: combination.clone(),
                });
            }
            Err(e) => {
                log::debug!("failed to build engine for {combination}: {e:#}");
            }
        }
    }

    anyhow::bail!(
        "no backend combination could be constructed (tried {})",
        BackendPriority::new(combinations.iter().cloned())
    )
}

#[cfg(test)]
mod tests {
    use std::{
        cell::RefCell,
        collections::HashSet,
        rc::Rc,
    };

    use super::*;

    /// Records construction and release of fake delegates.
    #[derive(Default)]
    struct Log {
        created: Vec<BackendKind>,
        released: Vec<BackendKind>,
        engines: Vec<Vec<BackendKind>>,
    }

    struct FakeHandle {
        kind: BackendKind,
        log: Rc<RefCell<Log>>,
    }

    impl Drop for FakeHandle {
        fn drop(&mut self) {
            self.log.borrow_mut().released.push(self.kind);
        }
    }

    struct FakeProvider {
        available: HashSet<BackendKind>,
        failing_engines: Vec<Combination>,
        log: Rc<RefCell<Log>>,
    }

    impl FakeProvider {
        fn new(available: &[BackendKind]) -> Self {
            Self {
                available: available.iter().copied().collect(),
                failing_engines: Vec::new(),
                log: Rc::default(),
            }
        }
    }

    impl BackendProvider for FakeProvider {
        type Handle = FakeHandle;
        type Engine = Combination;

        fn create_delegate(&mut self, kind: BackendKind) -> anyhow::Result<FakeHandle> {
            self.log.borrow_mut().created.push(kind);
            if !self.available.contains(&kind) {
                anyhow::bail!("{kind} not available");
            }
            Ok(FakeHandle {
                kind,
                log: self.log.clone(),
            })
        }

        fn build_engine(&mut self, delegates: &[&FakeHandle]) -> anyhow::Result<Combination> {
            let combination = Combination::new(delegates.iter().map(|h| h.kind));
            self.log
                .borrow_mut()
                .engines
                .push(combination.kinds().to_vec());
            if self.failing_engines.contains(&combination) {
                anyhow::bail!("engine construction failed");
            }
            Ok(combination)
        }
    }

    use BackendKind::*;

    fn default_priority() -> Vec<Combination> {
        BackendPriority::for_element_type(ElementType::F32).0
    }

    #[test]
    fn first_combination_wins() {
        let mut provider = FakeProvider::new(&[Npu, Gpu]);
        let resolved = resolve_from(&mut provider, &default_priority()).unwrap();
        assert_eq!(resolved.engine, Combination::new([Npu, Gpu]));
        assert_eq!(resolved.delegates.len(), 2);
        assert!(provider.log.borrow().released.is_empty());
    }

    #[test]
    fn falls_back_to_cpu() {
        let mut provider = FakeProvider::new(&[]);
        let resolved = resolve_from(&mut provider, &default_priority()).unwrap();
        assert!(resolved.combination.is_cpu());
        assert!(resolved.delegates.is_empty());

        // The GPU is only attempted once even though two combinations contain it.
        assert_eq!(provider.log.borrow().created, [Npu, Gpu]);
    }

    #[test]
    fn unused_delegates_are_released() {
        // NPU fails, so the constructed GPU delegate is reused by the second combination.
        let mut provider = FakeProvider::new(&[Gpu]);
        let resolved = resolve_from(&mut provider, &default_priority()).unwrap();
        assert_eq!(resolved.combination, Combination::new([Gpu]));
        assert_eq!(provider.log.borrow().created, [Npu, Gpu]);
        assert!(provider.log.borrow().released.is_empty());

        // The GPU engine fails to build, so the GPU delegate is released and the CPU is used.
        let mut provider = FakeProvider::new(&[Gpu]);
        provider.failing_engines.push(Combination::new([Gpu]));
        let resolved = resolve_from(&mut provider, &default_priority()).unwrap();
        assert!(resolved.combination.is_cpu());
        assert_eq!(provider.log.borrow().released, [Gpu]);
        assert_eq!(provider.log.borrow().engines, [vec![Gpu], vec![]]);
    }

    #[test]
    fn failed_engine_continues_with_next_combination() {
        let mut provider = FakeProvider::new(&[Npu, Gpu]);
        provider.failing_engines.push(Combination::new([Npu, Gpu]));
        let resolved = resolve_from(&mut provider, &default_priority()).unwrap();
        assert_eq!(resolved.combination, Combination::new([Gpu]));
        assert_eq!(resolved.delegates.len(), 1);
        // Only the NPU delegate is left over.
        assert_eq!(provider.log.borrow().released, [Npu]);
        assert_eq!(provider.log.borrow().created, [Npu, Gpu]);
    }

    #[test]
    fn cpu_fallback_always_succeeds() {
        let mut rng = fastrand::Rng::with_seed(99);
        let kinds = [Npu, NpuQuantized, Gpu];
        for _ in 0..200 {
            let mut combinations: Vec<_> = (0..rng.usize(0..5))
                .map(|_| {
                    Combination::new((0..rng.usize(1..3)).map(|_| kinds[rng.usize(..kinds.len())]))
                })
                .collect();
            combinations.push(Combination::cpu());

            let available: Vec<_> = kinds.iter().copied().filter(|_| rng.bool()).collect();
            let mut provider = FakeProvider::new(&available);
            provider.failing_engines = combinations
                .iter()
                .filter(|c| !c.is_cpu() && rng.bool())
                .cloned()
                .collect();

            let resolved = resolve_from(&mut provider, &combinations).unwrap();
            let created = provider.log.borrow().created.clone();
            let unique: HashSet<_> = created.iter().collect();
            assert_eq!(unique.len(), created.len(), "backend constructed twice");

            // Every constructed delegate is either in use or released, never both.
            let log = provider.log.borrow();
            let successful = created.iter().filter(|k| available.contains(k)).count();
            assert_eq!(resolved.delegates.len() + log.released.len(), successful);
        }
    }

    #[test]
    fn no_fallback_is_an_error() {
        let mut provider = FakeProvider::new(&[]);
        let combinations = [Combination::new([Gpu])];
        let err = resolve_from(&mut provider, &combinations).err().unwrap();
        assert!(err.to_string().contains("[gpu]"), "{err}");
    }

    #[test]
    fn deserialize_priority() {
        let priority: BackendPriority =
            serde_json::from_str(r#"[["npu_quantized", "gpu"], ["gpu"], []]"#).unwrap();
        assert_eq!(
            priority,
            BackendPriority::for_element_type(ElementType::U8)
        );
        assert_eq!(priority.to_string(), "[npu_quantized+gpu], [gpu], [cpu]");
    }
}
