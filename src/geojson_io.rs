// ===========================================================================
// GeoJSON ingestion and export
// ===========================================================================
use crate::error::StoreError;
use crate::geometry_utils::LocalTangentPlane;
use crate::graph::Vertex;
use crate::network::{
    Attributes, Line, LineId, Network, Node, NodeId, Station, StationId, Terminal,
};
use crate::stages::abstraction::AbstractedTopology;
use crate::store::{StoreMeta, Tables};
use ahash::AHashMap;
use geo::{BoundingRect, Centroid, MapCoords};
use geo_types::{Coord, LineString, MultiLineString, MultiPoint, MultiPolygon, Point, Polygon};
use geojson::{Feature, FeatureCollection, GeoJson, Geometry, JsonObject, JsonValue, Value};
use log::{info, warn};
use std::collections::BTreeSet;
use std::path::Path;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportOptions {
    /// Input is lon/lat; project it into a local tangent plane in metres.
    pub geographic: bool,
}

/// What a feature's geometry contributes to the tables.
enum Shape {
    Point(Coord<f64>),
    Line(Vec<Coord<f64>>),
    Area(Polygon<f64>),
}

fn position(raw: &[f64]) -> Result<Coord<f64>, StoreError> {
    match raw {
        [x, y, ..] => Ok(Coord { x: *x, y: *y }),
        _ => Err(StoreError::GeoJson(format!(
            "position needs two coordinates, got {}",
            raw.len()
        ))),
    }
}

fn ring(raw: &[Vec<f64>]) -> Result<LineString<f64>, StoreError> {
    raw.iter()
        .map(|p| position(p))
        .collect::<Result<Vec<_>, _>>()
        .map(LineString::new)
}

fn polygon(raw: &[Vec<Vec<f64>>]) -> Result<Option<Polygon<f64>>, StoreError> {
    let Some((exterior, interiors)) = raw.split_first() else {
        return Ok(None);
    };
    let interiors = interiors
        .iter()
        .map(|r| ring(r))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Some(Polygon::new(ring(exterior)?, interiors)))
}

fn shapes(value: &Value, out: &mut Vec<Shape>) -> Result<(), StoreError> {
    match value {
        Value::Point(p) => out.push(Shape::Point(position(p)?)),
        Value::MultiPoint(points) => {
            for p in points {
                out.push(Shape::Point(position(p)?));
            }
        }
        Value::LineString(coords) => out.push(Shape::Line(ring(coords)?.0)),
        Value::MultiLineString(lines) => {
            for coords in lines {
                out.push(Shape::Line(ring(coords)?.0));
            }
        }
        Value::Polygon(rings) => out.extend(polygon(rings)?.map(Shape::Area)),
        Value::MultiPolygon(polygons) => {
            for rings in polygons {
                out.extend(polygon(rings)?.map(Shape::Area));
            }
        }
        Value::GeometryCollection(geometries) => {
            for geometry in geometries {
                shapes(&geometry.value, out)?;
            }
        }
    }
    Ok(())
}

fn attributes(properties: Option<&JsonObject>) -> Attributes {
    properties
        .into_iter()
        .flatten()
        .filter_map(|(key, value)| {
            let text = match value {
                JsonValue::Null => return None,
                JsonValue::String(s) => s.clone(),
                other => other.to_string(),
            };
            Some((key.clone(), text))
        })
        .collect()
}

/// Exact coordinate key; only identical positions share a node.
fn coord_key(c: Coord<f64>) -> (u64, u64) {
    (c.x.to_bits(), c.y.to_bits())
}

struct Importer {
    tables: Tables,
    /// Position in `tables.nodes` of the node at each coordinate.
    node_at: AHashMap<(u64, u64), usize>,
    next_node: u64,
    next_line: u64,
    next_station: u64,
}

impl Importer {
    fn node(&mut self, at: Coord<f64>, tag: Option<&str>) -> NodeId {
        if let Some(node) = self
            .node_at
            .get(&coord_key(at))
            .and_then(|index| self.tables.nodes.get_mut(*index))
        {
            if let Some(tag) = tag {
                node.tag.get_or_insert_with(|| tag.to_string());
            }
            return node.id;
        }
        let id = NodeId(self.next_node);
        self.next_node += 1;
        self.node_at.insert(coord_key(at), self.tables.nodes.len());
        self.tables.nodes.push(Node {
            id,
            position: at,
            tag: tag.map(str::to_string),
            modified_by: None,
        });
        id
    }

    fn line(&mut self, coords: Vec<Coord<f64>>, attributes: Attributes) -> Option<LineId> {
        let (Some(first), Some(last)) = (coords.first().copied(), coords.last().copied()) else {
            return None;
        };
        let start = self.node(first, None);
        let end = self.node(last, None);
        let id = LineId(self.next_line);
        self.next_line += 1;
        self.tables.lines.push(Line {
            id,
            geometry: LineString::new(coords),
            start: Terminal::Node(start),
            end: Terminal::Node(end),
            attributes,
            tag: None,
            electrical: None,
            modified_by: None,
        });
        Some(id)
    }

    fn station(&mut self, area: MultiPolygon<f64>, attributes: Attributes) -> StationId {
        let id = StationId(self.next_station);
        self.next_station += 1;
        self.tables.stations.push(Station {
            id,
            boundary: area,
            attributes,
            nodes: BTreeSet::new(),
            joints: BTreeSet::new(),
            modified_by: None,
        });
        id
    }

    /// Each node joins the lowest station containing it.
    fn assign_membership(&mut self) {
        for node in &self.tables.nodes {
            if let Some(station) = self
                .tables
                .stations
                .iter_mut()
                .find(|s| s.contains_point(node.position))
            {
                station.nodes.insert(node.id);
            }
        }
    }
}

fn features(geojson: GeoJson) -> Vec<(Option<Geometry>, Option<JsonObject>)> {
    match geojson {
        GeoJson::FeatureCollection(collection) => collection
            .features
            .into_iter()
            .map(|f| (f.geometry, f.properties))
            .collect(),
        GeoJson::Feature(feature) => vec![(feature.geometry, feature.properties)],
        GeoJson::Geometry(geometry) => vec![(Some(geometry), None)],
    }
}

fn center(collected: &[(Vec<Shape>, Attributes)]) -> Option<(f64, f64)> {
    let coords: Vec<Coord<f64>> = collected
        .iter()
        .flat_map(|(shapes, _)| shapes.iter())
        .flat_map(|shape| match shape {
            Shape::Point(c) => vec![*c],
            Shape::Line(coords) => coords.clone(),
            Shape::Area(p) => p.exterior().0.clone(),
        })
        .collect();
    let rect = MultiPoint::from(coords).bounding_rect()?;
    let c = rect.center();
    Some((c.x, c.y))
}

/// Build fresh tables from GeoJSON text.
pub fn import_str(text: &str, options: ImportOptions) -> Result<Tables, StoreError> {
    let geojson: GeoJson = text
        .parse()
        .map_err(|e: geojson::Error| StoreError::GeoJson(e.to_string()))?;

    let mut collected = Vec::new();
    for (geometry, properties) in features(geojson) {
        let Some(geometry) = geometry else {
            warn!("skipping feature without geometry");
            continue;
        };
        let mut found = Vec::new();
        shapes(&geometry.value, &mut found)?;
        collected.push((found, attributes(properties.as_ref())));
    }

    let origin = if options.geographic { center(&collected) } else { None };
    let plane = origin.map(|(lon, lat)| LocalTangentPlane::new(lon, lat));
    let to_plane = |c: Coord<f64>| match &plane {
        Some(plane) => plane.project(c),
        None => c,
    };

    let mut importer = Importer {
        tables: Tables {
            meta: StoreMeta {
                origin,
                ..Default::default()
            },
            ..Default::default()
        },
        node_at: AHashMap::new(),
        next_node: 1,
        next_line: 1,
        next_station: 1,
    };

    // points first so that lines reuse the surveyed towers
    for (found, attrs) in &collected {
        for shape in found {
            if let Shape::Point(c) = shape {
                importer.node(to_plane(*c), attrs.get("power").map(String::as_str));
            }
        }
    }
    for (found, attrs) in collected {
        let mut areas = Vec::new();
        for shape in found {
            match shape {
                Shape::Point(_) => {}
                Shape::Line(coords) => {
                    let coords: Vec<Coord<f64>> = coords.into_iter().map(to_plane).collect();
                    if importer.line(coords, attrs.clone()).is_none() {
                        warn!("skipping empty line string");
                    }
                }
                Shape::Area(p) => areas.push(p.map_coords(to_plane)),
            }
        }
        if !areas.is_empty() {
            importer.station(MultiPolygon::new(areas), attrs);
        }
    }
    importer.assign_membership();

    // load once so dangling references or double ownership fail the import
    let meta = importer.tables.meta.clone();
    let network = Network::from_tables(importer.tables)
        .map_err(|e| StoreError::Corrupt(e.to_string()))?;
    let mut tables = network.to_tables();
    tables.meta = meta;
    info!(
        "imported {} nodes, {} lines, {} stations",
        tables.nodes.len(),
        tables.lines.len(),
        tables.stations.len()
    );
    Ok(tables)
}

pub fn import_file(path: &Path, options: ImportOptions) -> Result<Tables, StoreError> {
    let text = std::fs::read_to_string(path).map_err(|source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    import_str(&text, options)
}

/// Maps plane coordinates back to lon/lat when an origin is known.
struct Unprojector(Option<LocalTangentPlane>);

impl Unprojector {
    fn new(origin: Option<(f64, f64)>) -> Self {
        Self(origin.map(|(lon, lat)| LocalTangentPlane::new(lon, lat)))
    }

    fn coord(&self, c: Coord<f64>) -> Coord<f64> {
        match &self.0 {
            Some(plane) => plane.unproject(c),
            None => c,
        }
    }
}

fn feature(value: Value, properties: JsonObject) -> Feature {
    Feature {
        bbox: None,
        geometry: Some(Geometry::new(value)),
        id: None,
        properties: Some(properties),
        foreign_members: None,
    }
}

fn collection(features: Vec<Feature>) -> FeatureCollection {
    FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    }
}

fn line_properties(network: &Network, line: &Line) -> JsonObject {
    let mut properties = JsonObject::new();
    properties.insert("kind".to_string(), "line".into());
    properties.insert("id".to_string(), line.id.0.into());
    properties.insert("start".to_string(), line.start.to_string().into());
    properties.insert("end".to_string(), line.end.to_string().into());
    for (key, value) in &line.attributes {
        properties.insert(key.clone(), value.clone().into());
    }
    if let Some(tag) = line.tag.and_then(|id| network.tag(id)) {
        properties.insert("tag".to_string(), tag.label.clone().into());
    }
    if let Some(e) = &line.electrical {
        if let Ok(value) = serde_json::to_value(e) {
            properties.insert("electrical".to_string(), value);
        }
    }
    if let Some(hv) = &network.views().high_voltage {
        properties.insert("high_voltage".to_string(), hv.lines.contains(&line.id).into());
        properties.insert("closure".to_string(), hv.closure_lines.contains(&line.id).into());
    }
    properties
}

pub fn export_network(network: &Network, origin: Option<(f64, f64)>) -> FeatureCollection {
    let un = Unprojector::new(origin);
    let mut features = Vec::with_capacity(
        network.line_count() + network.station_count() + network.joint_count(),
    );
    for station in network.stations() {
        let boundary = station.boundary.map_coords(|c| un.coord(c));
        let mut properties = JsonObject::new();
        properties.insert("kind".to_string(), "station".into());
        properties.insert("id".to_string(), station.id.0.into());
        for (key, value) in &station.attributes {
            properties.insert(key.clone(), value.clone().into());
        }
        features.push(feature(Value::from(&boundary), properties));
    }
    for line in network.lines() {
        let geometry = line.geometry.map_coords(|c| un.coord(c));
        features.push(feature(Value::from(&geometry), line_properties(network, line)));
    }
    for joint in network.joints() {
        let mut properties = JsonObject::new();
        properties.insert("kind".to_string(), "joint".into());
        properties.insert("id".to_string(), joint.id.0.into());
        if let Ok(origin) = serde_json::to_value(joint.origin) {
            properties.insert("origin".to_string(), origin);
        }
        if let Some(station) = network.owner(Terminal::Joint(joint.id)) {
            properties.insert("station".to_string(), station.0.into());
        }
        features.push(feature(Value::from(&Point::from(un.coord(joint.position))), properties));
    }
    collection(features)
}

fn vertex_position(network: &Network, vertex: Vertex) -> Option<Coord<f64>> {
    match vertex {
        Vertex::Station(id) => network
            .station(id)
            .and_then(|s| s.boundary.centroid())
            .map(|p| p.0),
        Vertex::Joint(id) => network.joint(id).map(|j| j.position),
        Vertex::Node(id) => network.node(id).map(|n| n.position),
    }
}

pub fn export_abstraction(
    network: &Network,
    topology: &AbstractedTopology,
    origin: Option<(f64, f64)>,
) -> FeatureCollection {
    let un = Unprojector::new(origin);
    let mut features = Vec::with_capacity(topology.vertices.len() + topology.edges.len());
    for v in &topology.vertices {
        let Some(at) = vertex_position(network, v.vertex) else {
            continue;
        };
        let mut properties = JsonObject::new();
        properties.insert("kind".to_string(), "vertex".into());
        properties.insert("vertex".to_string(), v.vertex.to_string().into());
        properties.insert("degree".to_string(), v.degree.into());
        features.push(feature(Value::from(&Point::from(un.coord(at))), properties));
    }
    for edge in &topology.edges {
        let parts: Vec<LineString<f64>> = edge
            .lines
            .iter()
            .filter_map(|id| network.line(*id))
            .map(|l| l.geometry.map_coords(|c| un.coord(c)))
            .collect();
        let mut properties = JsonObject::new();
        properties.insert("kind".to_string(), "edge".into());
        properties.insert("from".to_string(), edge.from.to_string().into());
        properties.insert("to".to_string(), edge.to.to_string().into());
        properties.insert(
            "lines".to_string(),
            JsonValue::Array(edge.lines.iter().map(|id| id.0.into()).collect()),
        );
        properties.insert("length".to_string(), edge.length.into());
        if let Some(volts) = edge.max_voltage {
            properties.insert("max_voltage".to_string(), volts.into());
        }
        features.push(feature(Value::from(&MultiLineString::new(parts)), properties));
    }
    collection(features)
}

pub fn to_string(collection: FeatureCollection) -> String {
    GeoJson::from(collection).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SURVEY: &str = r#"{
        "type": "FeatureCollection",
        "features": [
            {"type": "Feature", "properties": {"power": "tower"},
             "geometry": {"type": "Point", "coordinates": [50.0, 0.0]}},
            {"type": "Feature", "properties": {"power": "line", "voltage": "380000", "circuits": 2},
             "geometry": {"type": "LineString", "coordinates": [[5.0, 5.0], [50.0, 0.0]]}},
            {"type": "Feature", "properties": {"power": "line", "ref": null},
             "geometry": {"type": "MultiLineString", "coordinates": [[[50.0, 0.0], [90.0, 0.0]], [[90.0, 0.0], [90.0, 40.0]]]}},
            {"type": "Feature", "properties": {"power": "substation"},
             "geometry": {"type": "Polygon", "coordinates": [[[0.0, 0.0], [10.0, 0.0], [10.0, 10.0], [0.0, 10.0], [0.0, 0.0]]]}}
        ]
    }"#;

    #[test]
    fn survey_becomes_tables() {
        let tables = import_str(SURVEY, ImportOptions::default()).unwrap();
        assert_eq!(tables.lines.len(), 3);
        assert_eq!(tables.stations.len(), 1);
        assert_eq!(tables.nodes.len(), 4);

        let tower = tables.nodes.iter().find(|n| n.position == Coord { x: 50.0, y: 0.0 }).unwrap();
        assert_eq!(tower.tag.as_deref(), Some("tower"));
        assert_eq!(tables.lines[0].end, Terminal::Node(tower.id));
        assert_eq!(tables.lines[1].start, Terminal::Node(tower.id));
        assert_eq!(tables.lines[0].attributes.get("circuits").map(String::as_str), Some("2"));
        assert!(!tables.lines[1].attributes.contains_key("ref"));

        let inside = &tables.stations[0].nodes;
        assert_eq!(inside.len(), 1);

        let mut reloaded = Network::from_tables(tables.clone()).unwrap().to_tables();
        reloaded.meta = tables.meta.clone();
        assert_eq!(reloaded, tables);
    }

    #[test]
    fn repeated_points_share_one_tagged_node() {
        let text = r#"{"type": "FeatureCollection", "features": [
            {"type": "Feature", "properties": {},
             "geometry": {"type": "LineString", "coordinates": [[0.0, 0.0], [10.0, 0.0]]}},
            {"type": "Feature", "properties": {"power": "tower"},
             "geometry": {"type": "Point", "coordinates": [10.0, 0.0]}},
            {"type": "Feature", "properties": {"power": "pole"},
             "geometry": {"type": "Point", "coordinates": [10.0, 0.0]}},
            {"type": "Feature", "properties": {},
             "geometry": {"type": "LineString", "coordinates": [[10.0, 0.0], [10.0, 10.0]]}}
        ]}"#;
        let tables = import_str(text, ImportOptions::default()).unwrap();
        assert_eq!(tables.nodes.len(), 3);
        let shared = tables.lines[0].end;
        assert_eq!(tables.lines[1].start, shared);
        let tower = tables.nodes.iter().find(|n| Terminal::Node(n.id) == shared).unwrap();
        assert_eq!(tower.tag.as_deref(), Some("tower"));
    }

    #[test]
    fn geographic_import_round_trips_through_export() {
        let text = r#"{"type": "Feature", "properties": {"power": "line"},
            "geometry": {"type": "LineString", "coordinates": [[8.50, 47.30], [8.52, 47.30]]}}"#;
        let tables = import_str(text, ImportOptions { geographic: true }).unwrap();
        let origin = tables.meta.origin.unwrap();
        assert!((origin.0 - 8.51).abs() < 1e-12 && (origin.1 - 47.30).abs() < 1e-12);
        let length = tables.lines[0].geometry.0[0].x.abs() * 2.0;
        assert!((length - 1508.0).abs() < 10.0, "length {}", length);

        let network = Network::from_tables(tables).unwrap();
        let exported = export_network(&network, Some(origin));
        let Some(Geometry { value: Value::LineString(coords), .. }) = &exported.features[0].geometry
        else {
            panic!("expected a line string");
        };
        assert!((coords[0][0] - 8.50).abs() < 1e-9);
        assert!((coords[1][1] - 47.30).abs() < 1e-9);
    }

    #[test]
    fn malformed_input_is_a_store_error() {
        let err = import_str("{\"type\": \"Nope\"}", ImportOptions::default()).unwrap_err();
        assert!(matches!(err, StoreError::GeoJson(_)));
    }
}
