//! Scenario replay against a live aggregate view.

use std::collections::BTreeMap;
use std::rc::Rc;

use anyhow::Context;
use confluence_collection::{Collection, EventBuffer, Items, KeyedContainer};
use confluence_view::AggregateView;
use serde_json::Value;
use tracing::debug;

use crate::scenario::{ScenarioConfig, ScenarioError, Step};

type Source = Rc<Collection<String, Value>>;
type Buffers<'a> = BTreeMap<String, Vec<EventBuffer<'a, String, Value>>>;

/// State of the view after one step.
#[derive(Clone, Debug)]
pub struct StepReport {
    pub index: usize,
    pub step: Step,
    pub attached: usize,
    pub view: Items<String, Value>,
}

/// Replay `config` and return the final contents of the view.
///
/// `observe` is called after every step. Buffers still open after the last
/// step are flushed before the final contents are read.
pub fn replay(
    config: &ScenarioConfig,
    mut observe: impl FnMut(&StepReport),
) -> anyhow::Result<Items<String, Value>> {
    config.validate()?;

    let sources: BTreeMap<String, Source> = config
        .sources
        .iter()
        .map(|s| (s.name.clone(), Rc::new(Collection::with_entries(s.entries.clone()))))
        .collect();
    let initial: Vec<Source> = config
        .sources
        .iter()
        .filter(|s| s.attach)
        .map(|s| Rc::clone(&sources[&s.name]))
        .collect();
    let view = AggregateView::with_collections(&initial).context("attaching initial sources")?;

    let mut buffers: Buffers<'_> = BTreeMap::new();
    for (index, step) in config.steps.iter().enumerate() {
        apply(step, &sources, &view, &mut buffers)
            .with_context(|| format!("step {index} ({step})"))?;
        debug!(index, %step, entries = view.len(), "step replayed");
        observe(&StepReport {
            index,
            step: step.clone(),
            attached: view.source_count(),
            view: view.all(),
        });
    }
    drop(buffers);

    Ok(view.all())
}

fn lookup<'a>(sources: &'a BTreeMap<String, Source>, name: &str) -> Result<&'a Source, ScenarioError> {
    sources
        .get(name)
        .ok_or_else(|| ScenarioError::UnknownSource(name.to_string()))
}

fn apply<'a>(
    step: &Step,
    sources: &'a BTreeMap<String, Source>,
    view: &AggregateView<String, Value>,
    buffers: &mut Buffers<'a>,
) -> anyhow::Result<()> {
    match step {
        Step::Attach { source } => view.attach_collection(lookup(sources, source)?)?,
        Step::Detach { source } => view.detach_collection(lookup(sources, source)?.as_ref())?,
        Step::DetachAll => view.detach_all_collections(),
        Step::Add { source, key, value } => {
            lookup(sources, source)?.add(key.clone(), value.clone())?;
        }
        Step::Update { source, key, value } => {
            lookup(sources, source)?.update(key.clone(), value.clone())?;
        }
        Step::Set { source, key, value } => {
            lookup(sources, source)?.set(key.clone(), value.clone());
        }
        Step::Remove { source, key } => {
            lookup(sources, source)?.remove(key)?;
        }
        Step::Clear { source } => lookup(sources, source)?.clear(),
        Step::Buffer { source } => {
            let collection = lookup(sources, source)?;
            buffers
                .entry(source.clone())
                .or_default()
                .push(collection.buffer_events());
        }
        Step::Flush { source } => {
            let buffer = buffers
                .get_mut(source)
                .and_then(Vec::pop)
                .ok_or_else(|| ScenarioError::UnbalancedFlush(source.clone()))?;
            drop(buffer);
        }
        Step::Expect { entries } => {
            let actual = view.all();
            if &actual != entries {
                return Err(ScenarioError::ExpectationFailed {
                    expected: serde_json::to_string(entries)?,
                    actual: serde_json::to_string(&actual)?,
                }
                .into());
            }
        }
    }
    Ok(())
}
