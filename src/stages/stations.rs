// ===========================================================================
// spatial-1, -2, -4, -5c: station geometry against the line network
// ===========================================================================
use super::{StageCounts, StageOutcome};
use crate::config::PipelineConfig;
use crate::error::StageError;
use crate::geometry_utils;
use crate::network::{JointOrigin, Network, Station, StationId, Terminal};
use crate::spatial_index::{EnvelopeIndex, around, to_aabb};
use crate::clusters::Clusters;
use geo::{Area, BooleanOps, Intersects};
use geo_types::Coord;
use log::debug;
use ordered_float::OrderedFloat;
use rayon::prelude::*;

fn station_index(network: &Network) -> EnvelopeIndex<StationId> {
    EnvelopeIndex::new(
        network
            .stations()
            .filter_map(|s| s.bbox().map(|b| (s.id, to_aabb(b)))),
    )
}

/// Stations overlapping by at least `fraction` of the smaller area, or touching.
fn should_merge(a: &Station, b: &Station, fraction: f64) -> bool {
    if !a.boundary.intersects(&b.boundary) {
        return false;
    }
    let smaller = a.area().min(b.area());
    let shared = a.boundary.intersection(&b.boundary).unsigned_area();
    if shared <= 1e-9 * smaller.max(1.0) {
        return true;
    }
    smaller > 0.0 && shared / smaller >= fraction
}

pub fn merge_stations(
    network: &mut Network,
    config: &PipelineConfig,
) -> Result<StageOutcome, StageError> {
    let mut counts = StageCounts::default();
    let stations: Vec<&Station> = network.stations().collect();
    let index = station_index(network);

    let pairs: Vec<(usize, usize)> = stations
        .par_iter()
        .enumerate()
        .flat_map_iter(|(i, a)| {
            let candidates = a
                .bbox()
                .map(|b| index.intersecting(&to_aabb(b)))
                .unwrap_or_default();
            candidates
                .into_iter()
                .filter(move |id| *id > a.id)
                .filter_map(|id| stations.binary_search_by_key(&id, |s| s.id).ok())
                .filter(|j| should_merge(a, stations[*j], config.station_overlap_fraction))
                .map(move |j| (i, j))
                .collect::<Vec<_>>()
        })
        .collect();

    let mut clusters = Clusters::new(stations.iter().map(|s| s.id));
    for (i, j) in &pairs {
        clusters.link(stations[*i].id, stations[*j].id);
    }
    let groups: Vec<Vec<StationId>> = clusters.into_merges();

    for group in groups {
        let keep = group[0];
        let mut absorbed = Vec::with_capacity(group.len() - 1);
        for other in &group[1..] {
            if let Some(station) = network.remove_station(*other) {
                absorbed.push(station);
                counts.merged += 1;
            }
        }
        network.update_station(keep, |station| {
            for other in &absorbed {
                station.boundary = station.boundary.union(&other.boundary);
                for (k, v) in &other.attributes {
                    station.attributes.entry(k.clone()).or_insert_with(|| v.clone());
                }
                station.nodes.extend(other.nodes.iter().copied());
                station.joints.extend(other.joints.iter().copied());
            }
        });
        debug!("merged stations {:?} into {}", &group[1..], keep);
    }

    counts.updated += assign_contained_terminals(network);
    Ok(StageOutcome::from_counts(counts))
}

/// Free terminals strictly inside a station join the lowest such station.
fn assign_contained_terminals(network: &mut Network) -> usize {
    let index = station_index(network);
    let assignments: Vec<(Terminal, StationId)> = network
        .terminals()
        .into_par_iter()
        .filter(|t| network.is_free(*t))
        .filter_map(|t| {
            let pos = network.position(t)?;
            index
                .intersecting(&around(pos, 0.0))
                .into_iter()
                .find(|id| network.station(*id).is_some_and(|s| s.contains_point(pos)))
                .map(|id| (t, id))
        })
        .collect();
    let mut assigned = 0;
    for (terminal, station) in assignments {
        if network.set_owner(terminal, Some(station)) {
            assigned += 1;
        }
    }
    assigned
}

pub fn eliminate_internal_lines(
    network: &mut Network,
    config: &PipelineConfig,
) -> Result<StageOutcome, StageError> {
    let mut counts = StageCounts::default();
    let tolerance = config.coincidence_tolerance;
    let index = station_index(network);
    let internal: Vec<_> = network
        .lines()
        .collect::<Vec<_>>()
        .into_par_iter()
        .filter(|line| {
            let Some(bbox) = line.bbox() else {
                return false;
            };
            index
                .intersecting(&to_aabb(bbox))
                .into_iter()
                .filter_map(|id| network.station(id))
                .any(|s| s.encloses(&line.geometry, tolerance))
        })
        .map(|line| line.id)
        .collect();

    for id in internal {
        network.remove_line(id);
        counts.eliminated += 1;
        debug!("removed station-internal line {}", id);
    }
    let (nodes, joints) = network.prune_orphans();
    counts.eliminated += nodes + joints;
    Ok(StageOutcome::from_counts(counts))
}

/// Nearest station whose boundary lies within `tolerance` of `pos` while not containing it.
fn touching_station(
    network: &Network,
    index: &EnvelopeIndex<StationId>,
    pos: Coord<f64>,
    tolerance: f64,
) -> Option<StationId> {
    index
        .intersecting(&around(pos, tolerance))
        .into_iter()
        .filter_map(|id| network.station(id))
        .filter(|s| !s.contains_point(pos))
        .map(|s| (s.boundary_distance(pos), s.id))
        .filter(|(d, _)| *d <= tolerance)
        .min_by_key(|(d, id)| (OrderedFloat(*d), *id))
        .map(|(_, id)| id)
}

pub fn attachment_joints(
    network: &mut Network,
    config: &PipelineConfig,
) -> Result<StageOutcome, StageError> {
    let mut counts = StageCounts::default();
    let tolerance = config.coincidence_tolerance;
    let index = station_index(network);
    let candidates: Vec<(Terminal, StationId)> = network
        .terminals()
        .into_par_iter()
        .filter(|t| network.is_free(*t) && network.degree(*t) > 0)
        .filter_map(|t| {
            let pos = network.position(t)?;
            touching_station(network, &index, pos, tolerance).map(|s| (t, s))
        })
        .collect();

    for (terminal, station) in candidates {
        let Some(pos) = network.position(terminal) else {
            continue;
        };
        let existing = network.station(station).and_then(|s| {
            s.joints
                .iter()
                .copied()
                .find(|j| {
                    network
                        .joint(*j)
                        .is_some_and(|joint| geometry_utils::distance(joint.position, pos) <= tolerance)
                })
        });
        match (existing, terminal) {
            (Some(joint), _) => {
                network.retarget_all(terminal, Terminal::Joint(joint))?;
                network.remove_terminal(terminal);
                counts.merged += 1;
            }
            (None, Terminal::Joint(_)) => {
                network.set_owner(terminal, Some(station));
                counts.updated += 1;
            }
            (None, Terminal::Node(node)) => {
                let joint = network.promote_to_joint(node, JointOrigin::Attachment)?;
                network.set_owner(Terminal::Joint(joint), Some(station));
                counts.created += 1;
            }
        }
        debug!("attached {} to station {}", terminal, station);
    }
    Ok(StageOutcome::from_counts(counts))
}

pub fn joint_stations(
    network: &mut Network,
    config: &PipelineConfig,
) -> Result<StageOutcome, StageError> {
    let mut counts = StageCounts::default();
    let tolerance = config.coincidence_tolerance;
    let index = station_index(network);
    let assignments: Vec<(Terminal, StationId)> = network
        .joints()
        .map(|j| (Terminal::Joint(j.id), j.position))
        .filter(|(t, _)| network.is_free(*t))
        .filter_map(|(t, pos)| {
            index
                .intersecting(&around(pos, tolerance))
                .into_iter()
                .find(|id| {
                    network
                        .station(*id)
                        .is_some_and(|s| s.covers_point(pos, tolerance))
                })
                .map(|id| (t, id))
        })
        .collect();
    for (terminal, station) in assignments {
        if network.set_owner(terminal, Some(station)) {
            counts.updated += 1;
        }
    }
    Ok(StageOutcome::from_counts(counts))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::fixtures::NetworkFixture;

    fn square(x: f64, y: f64, size: f64) -> Vec<(f64, f64)> {
        vec![(x, y), (x + size, y), (x + size, y + size), (x, y + size)]
    }

    #[test]
    fn overlapping_and_touching_stations_merge() {
        let mut fx = NetworkFixture::new();
        let s1 = fx.station(&square(0.0, 0.0, 10.0));
        let s2 = fx.station(&square(5.0, 0.0, 10.0));
        let s3 = fx.station(&square(15.0, 0.0, 10.0));
        let apart = fx.station(&square(100.0, 0.0, 10.0));
        fx.station_attrs(s2, &[("voltage", "380000")]);
        let mut network = fx.build();

        let outcome = merge_stations(&mut network, &PipelineConfig::default()).unwrap();
        assert_eq!(outcome.counts.merged, 2);
        assert_eq!(network.station_ids(), vec![s1, apart]);
        let merged = network.station(s1).unwrap();
        assert!((merged.area() - 250.0).abs() < 1e-6);
        assert_eq!(merged.attribute("voltage"), Some("380000"));
        assert!(network.station(s3).is_none());
        assert!(merge_stations(&mut network, &PipelineConfig::default()).unwrap().counts.is_empty());
    }

    #[test]
    fn slight_overlap_below_fraction_keeps_stations_apart() {
        let mut fx = NetworkFixture::new();
        fx.station(&square(0.0, 0.0, 10.0));
        fx.station(&square(9.5, 0.0, 10.0));
        let mut network = fx.build();
        let outcome = merge_stations(&mut network, &PipelineConfig::default()).unwrap();
        assert!(outcome.counts.is_empty());
        assert_eq!(network.station_count(), 2);
    }

    #[test]
    fn internal_line_and_its_endpoints_leave_the_station() {
        let mut fx = NetworkFixture::new();
        let station = fx.station(&square(0.0, 0.0, 100.0));
        let busbar = fx.node(50.0, 50.0);
        let other = fx.node(60.0, 50.0);
        let outside = fx.node(200.0, 50.0);
        fx.line_between(busbar, other, &[]);
        fx.line_between(other, outside, &[]);
        let mut network = fx.build();
        assert_eq!(network.station(station).unwrap().nodes.len(), 2);

        let outcome = eliminate_internal_lines(&mut network, &PipelineConfig::default()).unwrap();
        assert_eq!(outcome.counts.eliminated, 2);
        assert_eq!(network.line_count(), 1);
        let members = &network.station(station).unwrap().nodes;
        assert_eq!(members.len(), 1);
        assert!(members.contains(&other));
        let again = eliminate_internal_lines(&mut network, &PipelineConfig::default()).unwrap();
        assert!(again.counts.is_empty());
    }

    #[test]
    fn terminal_on_boundary_becomes_owned_attachment_joint() {
        let mut fx = NetworkFixture::new();
        let station = fx.station(&square(0.0, 0.0, 10.0));
        let line = fx.line(&[(10.05, 5.0), (40.0, 5.0)]);
        let mut network = fx.build();

        let outcome = attachment_joints(&mut network, &PipelineConfig::default()).unwrap();
        assert_eq!(outcome.counts.created, 1);
        let start = network.line(line).unwrap().start;
        let Terminal::Joint(joint) = start else {
            panic!("expected a joint, got {}", start);
        };
        assert_eq!(network.joint(joint).unwrap().origin, JointOrigin::Attachment);
        assert_eq!(network.owner(start), Some(station));
        assert!(attachment_joints(&mut network, &PipelineConfig::default()).unwrap().counts.is_empty());
    }

    #[test]
    fn free_joint_inside_station_is_reclassified() {
        let mut fx = NetworkFixture::new();
        let station = fx.station(&square(0.0, 0.0, 10.0));
        let mut network = fx.build();
        let joint = network.add_joint(Coord { x: 5.0, y: 5.0 }, JointOrigin::Split);
        let outcome = joint_stations(&mut network, &PipelineConfig::default()).unwrap();
        assert_eq!(outcome.counts.updated, 1);
        assert_eq!(network.owner(Terminal::Joint(joint)), Some(station));
        assert!(joint_stations(&mut network, &PipelineConfig::default()).unwrap().counts.is_empty());
    }
}
