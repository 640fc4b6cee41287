// ===========================================================================
// topology-3a: propagate line labels through free terminals
// ===========================================================================
use super::{StageCounts, StageOutcome};
use crate::config::PipelineConfig;
use crate::error::StageError;
use crate::network::{Interned, LineId, Network, TagId};
use ahash::AHashMap;
use log::debug;
use std::collections::{BTreeMap, VecDeque};

pub fn run(network: &mut Network, config: &PipelineConfig) -> Result<StageOutcome, StageError> {
    let mut counts = StageCounts::default();
    let graph = network.connectivity()?;

    let seeds: Vec<(LineId, String)> = network
        .lines()
        .filter_map(|l| {
            l.attribute(&config.tag_key)
                .map(str::trim)
                .filter(|label| !label.is_empty())
                .map(|label| (l.id, label.to_string()))
        })
        .collect();

    let mut assigned: BTreeMap<LineId, TagId> = BTreeMap::new();
    let mut queue = VecDeque::with_capacity(seeds.len());
    let mut labels: AHashMap<String, TagId> = AHashMap::new();
    for (line, label) in &seeds {
        let tag = match labels.get(label) {
            Some(tag) => *tag,
            None => {
                // seeds are ascending, so the first line seen is the lowest
                let (tag, interned) = network.intern_tag(label, *line);
                match interned {
                    Interned::Created => counts.created += 1,
                    Interned::Reseeded => counts.updated += 1,
                    Interned::Existing => {}
                }
                labels.insert(label.clone(), tag);
                tag
            }
        };
        assigned.insert(*line, tag);
        queue.push_back(*line);
    }

    while let Some(line) = queue.pop_front() {
        let Some((a, b)) = graph.endpoints(line) else {
            continue;
        };
        let tag = assigned[&line];
        for vertex in [a, b] {
            if vertex.is_station() {
                continue;
            }
            for next in graph.lines_at(vertex) {
                if !assigned.contains_key(next) {
                    assigned.insert(*next, tag);
                    queue.push_back(*next);
                }
            }
        }
    }

    for id in network.line_ids() {
        let want = assigned.get(&id).copied();
        if network.line(id).is_some_and(|l| l.tag != want) {
            network.update_line(id, |l| l.tag = want);
            counts.updated += 1;
        }
    }

    let unused: Vec<TagId> = network
        .tags()
        .map(|t| t.id)
        .filter(|id| !labels.values().any(|used| used == id))
        .collect();
    for id in unused {
        network.remove_tag(id);
        counts.eliminated += 1;
    }
    debug!(
        "{} labels spread over {} of {} lines",
        labels.len(),
        assigned.len(),
        network.line_count()
    );
    Ok(StageOutcome::from_counts(counts).metric("tags", labels.len()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::fixtures::NetworkFixture;
    use crate::network::Terminal;
    use crate::store::{Record, Write};

    #[test]
    fn labels_spread_until_station_or_gap() {
        let mut fx = NetworkFixture::new();
        fx.station(&[(100.0, -10.0), (120.0, -10.0), (120.0, 10.0), (100.0, 10.0)]);
        let a = fx.node(0.0, 0.0);
        let b = fx.node(50.0, 0.0);
        let c = fx.node(110.0, 0.0);
        let d = fx.node(200.0, 0.0);
        let seed = fx.line_between(a, b, &[]);
        let reached = fx.line_between(b, c, &[]);
        let beyond = fx.line_between(c, d, &[]);
        let detached = fx.line(&[(0.0, 50.0), (50.0, 50.0)]);
        fx.attrs(seed, &[("ref", "L1")]);
        let mut network = fx.build();
        assert!(network.owner(Terminal::Node(c)).is_some());

        let outcome = run(&mut network, &PipelineConfig::default()).unwrap();
        assert_eq!(outcome.counts.created, 1);
        let tag = network.line(seed).unwrap().tag;
        assert!(tag.is_some());
        assert_eq!(network.line(reached).unwrap().tag, tag);
        assert_eq!(network.line(beyond).unwrap().tag, None);
        assert_eq!(network.line(detached).unwrap().tag, None);

        assert!(run(&mut network, &PipelineConfig::default()).unwrap().counts.is_empty());
    }

    #[test]
    fn equal_depth_goes_to_lower_seed() {
        let mut fx = NetworkFixture::new();
        let a = fx.node(0.0, 0.0);
        let b = fx.node(10.0, 0.0);
        let c = fx.node(20.0, 0.0);
        let d = fx.node(30.0, 0.0);
        let low = fx.line_between(a, b, &[]);
        let middle = fx.line_between(b, c, &[]);
        let high = fx.line_between(c, d, &[]);
        fx.attrs(high, &[("ref", "east")]);
        fx.attrs(low, &[("ref", "west")]);
        let mut network = fx.build();

        run(&mut network, &PipelineConfig::default()).unwrap();
        let label = |id| {
            let tag = network.line(id).unwrap().tag.unwrap();
            network.tag(tag).unwrap().label.clone()
        };
        assert_eq!(label(middle), "west");
        assert_eq!(label(high), "east");
        assert_eq!(network.tags().count(), 2);
    }

    #[test]
    fn lower_line_taking_a_label_reseeds_the_tag() {
        let mut fx = NetworkFixture::new();
        let first = fx.line(&[(0.0, 0.0), (10.0, 0.0)]);
        let second = fx.line(&[(0.0, 50.0), (10.0, 50.0)]);
        fx.attrs(second, &[("ref", "L7")]);
        let mut network = fx.build();
        run(&mut network, &PipelineConfig::default()).unwrap();
        let tag = network.line(second).unwrap().tag.unwrap();
        assert_eq!(network.tag(tag).unwrap().seed, second);

        network.update_line(first, |l| {
            l.attributes.insert("ref".into(), "L7".into());
        });
        let _ = network.take_batch();
        let outcome = run(&mut network, &PipelineConfig::default()).unwrap();
        // the reseed plus the first line picking up the tag
        assert_eq!((outcome.counts.created, outcome.counts.updated), (0, 2));
        assert_eq!(network.tag(tag).unwrap().seed, first);
        assert_eq!(network.line(first).unwrap().tag, Some(tag));

        let batch = network.take_batch();
        assert!(batch
            .writes
            .iter()
            .any(|w| matches!(w, Write::Upsert(Record::Tag(t)) if t.id == tag)));
    }

    #[test]
    fn labels_without_lines_are_dropped() {
        let mut fx = NetworkFixture::new();
        let line = fx.line(&[(0.0, 0.0), (10.0, 0.0)]);
        fx.attrs(line, &[("ref", "old")]);
        let mut network = fx.build();
        run(&mut network, &PipelineConfig::default()).unwrap();

        network.update_line(line, |l| {
            l.attributes.insert("ref".into(), "new".into());
        });
        let outcome = run(&mut network, &PipelineConfig::default()).unwrap();
        assert_eq!((outcome.counts.created, outcome.counts.eliminated), (1, 1));
        assert_eq!(network.tags().map(|t| t.label.as_str()).collect::<Vec<_>>(), vec!["new"]);
    }
}
