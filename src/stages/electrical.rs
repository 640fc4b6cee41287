// ===========================================================================
// topology-3b: voltages, circuits and electrical components
// ===========================================================================
use super::{StageCounts, StageOutcome};
use crate::config::{ConflictPolicy, PipelineConfig, VoltageConfig};
use crate::error::{ConflictError, StageError};
use crate::graph::{ConnectivityGraph, Vertex};
use crate::network::{ElectricalProperties, Line, LineId, Network, Station, VoltageClass};
use itertools::Itertools;
use log::{debug, warn};
use std::collections::{BTreeMap, BTreeSet};

/// Volts listed in a `;`-separated survey value, ascending and deduplicated.
/// Entries that are not numbers are skipped.
pub fn parse_voltages(raw: &str) -> Vec<u32> {
    raw.split(';')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .filter_map(|part| match part.parse::<u32>() {
            Ok(v) => Some(v),
            Err(_) => part
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite() && *v >= 0.0 && *v <= u32::MAX as f64)
                .map(|v| v.round() as u32),
        })
        .sorted()
        .dedup()
        .collect()
}

pub fn classify(volts: u32, config: &VoltageConfig) -> VoltageClass {
    if volts < config.medium_voltage_min {
        VoltageClass::Low
    } else if volts < config.high_voltage_min {
        VoltageClass::Medium
    } else {
        VoltageClass::High
    }
}

/// Classes a station is rated for by its own `voltage` attribute.
pub fn station_classes(station: &Station, config: &VoltageConfig) -> BTreeSet<VoltageClass> {
    station
        .attribute("voltage")
        .map(parse_voltages)
        .unwrap_or_default()
        .into_iter()
        .map(|v| classify(v, config))
        .collect()
}

fn first_value(line: &Line, key: &str) -> Option<String> {
    line.attribute(key)
        .and_then(|raw| raw.split(';').map(str::trim).find(|s| !s.is_empty()))
        .map(str::to_string)
}

/// Everything derivable from the line's own attributes.
fn line_properties(line: &Line, component: LineId, config: &VoltageConfig) -> ElectricalProperties {
    let voltages = line.attribute("voltage").map(parse_voltages).unwrap_or_default();
    if let Some(raw) = line.attribute("voltage") {
        if voltages.is_empty() && !raw.trim().is_empty() {
            warn!("line {} has unreadable voltage '{}'", line.id, raw);
        }
    }
    let nominal_voltage = voltages.last().copied();
    let cables = first_value(line, "cables").and_then(|v| v.parse::<u32>().ok());
    let circuits = first_value(line, "circuits")
        .and_then(|v| v.parse::<u32>().ok())
        .or_else(|| cables.map(|c| c / 3).filter(|c| *c > 0));
    ElectricalProperties {
        class: nominal_voltage.map(|v| classify(v, config)),
        voltages,
        nominal_voltage,
        inferred: false,
        frequency: first_value(line, "frequency").and_then(|v| v.parse::<f64>().ok()),
        cables,
        wires: line.attribute("wires").map(str::to_string),
        circuits,
        component,
        conflicted: false,
    }
}

/// Lines connected through free terminals, each list ascending, ordered by
/// its lowest line.
fn components(network: &Network, graph: &ConnectivityGraph) -> Vec<Vec<LineId>> {
    let mut seen = BTreeSet::new();
    let mut result = Vec::new();
    for line in network.line_ids() {
        if seen.contains(&line) {
            continue;
        }
        let mut members = graph.reach_lines(line, |v| !v.is_station());
        members.sort();
        seen.extend(members.iter().copied());
        result.push(members);
    }
    result
}

/// Highest class every adjacent station agrees on.
fn station_fallback(
    network: &Network,
    graph: &ConnectivityGraph,
    members: &[LineId],
    config: &VoltageConfig,
) -> Option<VoltageClass> {
    let stations: BTreeSet<_> = members
        .iter()
        .filter_map(|id| graph.endpoints(*id))
        .flat_map(|(a, b)| [a, b])
        .filter_map(|v| match v {
            Vertex::Station(id) => Some(id),
            _ => None,
        })
        .collect();
    let mut shared: Option<BTreeSet<VoltageClass>> = None;
    for id in stations {
        let Some(station) = network.station(id) else {
            continue;
        };
        let rated = station_classes(station, config);
        if rated.is_empty() {
            continue;
        }
        shared = Some(match shared {
            Some(current) => current.intersection(&rated).copied().collect(),
            None => rated,
        });
    }
    shared.and_then(|classes| classes.last().copied())
}

pub fn run(network: &mut Network, config: &PipelineConfig) -> Result<StageOutcome, StageError> {
    let mut counts = StageCounts::default();
    let voltage = &config.voltage;
    let graph = network.connectivity()?;
    let groups = components(network, &graph);

    let mut derived: BTreeMap<LineId, ElectricalProperties> = BTreeMap::new();
    let mut conflicts = Vec::new();
    for members in &groups {
        let component = members[0];
        let mut props: Vec<ElectricalProperties> = members
            .iter()
            .filter_map(|id| network.line(*id))
            .map(|l| line_properties(l, component, voltage))
            .collect();
        let rated: Vec<BTreeSet<VoltageClass>> = props
            .iter()
            .map(|p| p.voltages.iter().map(|v| classify(*v, voltage)).collect::<BTreeSet<_>>())
            .filter(|classes| !classes.is_empty())
            .collect();
        let evidence: BTreeSet<VoltageClass> = rated.iter().flatten().copied().collect();
        let common = rated
            .iter()
            .skip(1)
            .fold(rated.first().cloned().unwrap_or_default(), |shared, classes| {
                shared.intersection(classes).copied().collect()
            });

        if !rated.is_empty() && common.is_empty() {
            let conflict = ConflictError {
                component,
                classes: evidence.iter().copied().collect(),
                lines: members.clone(),
            };
            warn!("{}", conflict);
            let highest = evidence.last().copied();
            for p in &mut props {
                match voltage.conflict_policy {
                    ConflictPolicy::Flag => p.conflicted = true,
                    ConflictPolicy::Highest => {
                        if p.class != highest {
                            p.class = highest;
                            p.inferred = true;
                        }
                    }
                }
            }
            conflicts.push(conflict);
        } else {
            let inherited = match common.last() {
                Some(class) => Some(*class),
                None => station_fallback(network, &graph, members, voltage),
            };
            for p in props.iter_mut().filter(|p| p.class.is_none()) {
                if inherited.is_some() {
                    p.class = inherited;
                    p.inferred = true;
                }
            }
        }
        for (id, p) in members.iter().zip(props) {
            derived.insert(*id, p);
        }
    }

    for (id, props) in derived {
        if network.line(id).is_some_and(|l| l.electrical.as_ref() != Some(&props)) {
            network.update_line(id, |l| l.electrical = Some(props));
            counts.updated += 1;
        }
    }
    let recorded = conflicts.clone();
    if network.update_views(|views| views.conflicts = recorded) {
        debug!("recorded {} voltage conflicts", conflicts.len());
    }

    Ok(StageOutcome {
        counts,
        conflicts,
        ..Default::default()
    }
    .metric("components", groups.len()))
}
