//! Auspice v2 JSON for one annotated subtree.
//!
//! Node objects are assembled bottom-up from a postorder walk, so deep
//! subtrees never recurse. Child lists are written last-child first, which is
//! how the viewer expects to draw them top to bottom.

use std::fs;
use std::path::Path;

use serde_json::{json, Map, Value};
use tracing::debug;

use super::aa_change::{amino_acid_changes, GeneAaChanges};
use super::genes::GeneAnnotation;
use super::majority::NodeAttributes;
use super::metadata::{MetadataTable, SampleMetadata};
use super::ExportError;
use crate::genomics::{ReferenceGenome, Snv, Strand};
use crate::placement::Placements;
use crate::tree::{NodeId, PhyloTree, SubtreeInfo};

/// Attribute value of newly uploaded samples.
pub const UPLOADED_SAMPLE: &str = "uploaded sample";

/// Auspice numbers unnamed nodes starting here.
const FIRST_NODE_NUMBER: usize = 10_000;

/// More uploaded samples than this are summarized in the title.
const TITLE_LIST_MAX: usize = 10;

const DEFAULT_DESCRIPTION: &str = "Dataset generated by phyloplace using the \
    [usher](https://github.com/yatisht/usher/) program. If you have metadata you wish to \
    display, you can drag a CSV file onto this view.";

const SARS_COV_2_CLADE_COLORS: &[(&str, &str)] = &[
    ("20H (Beta, V2)", "#5E1D9D"),
    ("20I (Alpha, V1)", "#492AB5"),
    ("20J (Gamma, V3)", "#4042C7"),
    ("21A (Delta)", "#3E5DD0"),
    ("21I (Delta)", "#4377CD"),
    ("21J (Delta)", "#4A8CC2"),
    ("21B (Kappa)", "#549DB2"),
    ("21C (Epsilon)", "#60AA9E"),
    ("21D (Eta)", "#6EB389"),
    ("21E (Theta)", "#80B974"),
    ("21F (Iota)", "#92BC63"),
    ("21G (Lambda)", "#A6BE55"),
    ("21H (Mu)", "#B9BC4A"),
    ("21K (Omicron)", "#CBB742"),
    ("21L (Omicron)", "#D9AD3D"),
    ("21M (Omicron)", "#E29D39"),
    ("22A (Omicron)", "#E68634"),
    ("22B (Omicron)", "#E56A2F"),
    ("22C (Omicron)", "#E04929"),
    ("22D (Omicron)", "#DB2823"),
    (UPLOADED_SAMPLE, "#000000"),
];

/// Attribute naming and coloring conventions of a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeScheme {
    /// SARS-CoV-2 (`wuhCor1`): Pango lineages and Nextstrain clades.
    SarsCov2,
    /// RSV assemblies: Goya clades and RGCC lineages.
    Rsv,
    /// Pathogens with Nextstrain clades only.
    NextstrainClade,
    /// Anything else: Nextstrain lineages.
    Generic,
}

impl AttributeScheme {
    /// Scheme for an organism / assembly name.
    pub fn for_organism(name: &str) -> Self {
        let any = |ids: &[&str]| ids.iter().any(|id| name.contains(id));
        if name == "wuhCor1" {
            Self::SarsCov2
        } else if any(&["GCF_000855545", "GCF_002815475", "RGCC"]) {
            Self::Rsv
        } else if any(&["GCF_000865085", "GCF_001343785"]) {
            Self::NextstrainClade
        } else {
            Self::Generic
        }
    }

    /// Metadata fields offered as colorings, most preferred default first.
    pub fn color_fields(self) -> &'static [&'static str] {
        match self {
            Self::SarsCov2 => &[
                "pango_lineage",
                "Nextstrain_clade",
                "pango_lineage_usher",
                "Nextstrain_clade_usher",
                "country",
            ],
            Self::Rsv => &[
                "goya_usher",
                "goya_nextclade",
                "GCC_assigned_2023-11",
                "GCC_usher",
                "GCC_nextclade",
                "country",
            ],
            Self::NextstrainClade => &["Nextstrain_clade", "country"],
            Self::Generic => &["Nextstrain_lineage", "country"],
        }
    }

    fn extra_filters(self) -> &'static [&'static str] {
        match self {
            Self::SarsCov2 => &[
                "pango_lineage_usher",
                "pango_lineage",
                "Nextstrain_clade_usher",
                "Nextstrain_clade",
            ],
            Self::Rsv => &[
                "GCC_usher",
                "GCC_nextclade",
                "GCC_assigned_2023-11",
                "goya_usher",
                "goya_nextclade",
            ],
            Self::NextstrainClade => &["Nextstrain_clade"],
            Self::Generic => &["Nextstrain_lineage"],
        }
    }

    /// Default `color_by`: the first preferred field this dataset offers.
    pub fn default_color(self) -> &'static str {
        let fields = self.color_fields();
        [
            "pango_lineage_usher",
            "Nextstrain_lineage",
            "Nextstrain_clade",
            "GCC_usher",
        ]
        .into_iter()
        .find(|f| fields.contains(f))
        .or_else(|| fields.first().copied())
        .unwrap_or("userOrOld")
    }

    fn keys(self) -> AttributeKeys {
        let rsv = self == Self::Rsv;
        AttributeKeys {
            nextstrain_clade: if rsv { "goya_nextclade" } else { "Nextstrain_clade" },
            gisaid_clade: if rsv { "GCC_assigned_2023-11" } else { "GISAID_clade" },
            lineage: if rsv { "GCC_nextclade" } else { "pango_lineage" },
            nextstrain_clade_usher: if rsv { "goya_usher" } else { "Nextstrain_clade_usher" },
            lineage_usher: if rsv { "GCC_usher" } else { "pango_lineage_usher" },
        }
    }
}

struct AttributeKeys {
    nextstrain_clade: &'static str,
    gisaid_clade: &'static str,
    lineage: &'static str,
    nextstrain_clade_usher: &'static str,
    lineage_usher: &'static str,
}

fn coloring_title(field: &str, scheme: AttributeScheme) -> &str {
    match field {
        "Nextstrain_clade" if scheme == AttributeScheme::SarsCov2 => "Nextstrain Clade",
        "Nextstrain_clade" => "Clade assigned by nextclade",
        "Nextstrain_clade_usher" => "Nextstrain Clade assigned by UShER",
        "pango_lineage" => "Pango lineage",
        "pango_lineage_usher" => "Pango lineage assigned by UShER",
        "Nextstrain_lineage" => "Nextstrain lineage",
        "goya_nextclade" => "Goya 2020 clade assigned by nextclade",
        "goya_usher" => "Goya 2020 clade assigned by UShER",
        "GCC_nextclade" => "RGCC lineage assigned by nextclade",
        "GCC_usher" => "RGCC lineage assigned by UShER",
        "GCC_assigned_2023-11" => "RGCC designated lineage",
        "country" => "Country",
        other => other,
    }
}

fn categorical(key: &str, title: &str) -> Map<String, Value> {
    let mut coloring = Map::new();
    coloring.insert("key".into(), json!(key));
    coloring.insert("title".into(), json!(title));
    coloring.insert("type".into(), json!("categorical"));
    coloring
}

fn value_object(value: &str, url: Option<String>) -> Value {
    let mut object = Map::new();
    object.insert("value".into(), json!(value));
    if let Some(url) = url.filter(|u| !u.is_empty()) {
        object.insert("url".into(), json!(url));
    }
    Value::Object(object)
}

fn snv_labels(snvs: &[Snv]) -> Vec<String> {
    snvs.iter().map(Snv::to_string).collect()
}

fn aa_labels<'a>(genes: impl Iterator<Item = &'a GeneAaChanges>) -> String {
    genes
        .flat_map(|g| g.changes.iter().map(move |c| format!("{}:{}", g.gene, c)))
        .collect::<Vec<_>>()
        .join(",")
}

/// Writes [`SubtreeInfo`]s as Auspice v2 JSON.
#[derive(Debug)]
pub struct TreeJsonExporter<'a> {
    reference: &'a ReferenceGenome,
    genes: &'a [GeneAnnotation],
    placements: &'a Placements,
    metadata: Option<&'a MetadataTable>,
    scheme: AttributeScheme,
    source: String,
    lineage_url_base: Option<String>,
    description: String,
}

impl<'a> TreeJsonExporter<'a> {
    /// Exporter for one organism.
    pub fn new(
        reference: &'a ReferenceGenome,
        genes: &'a [GeneAnnotation],
        placements: &'a Placements,
        organism: &str,
    ) -> Self {
        Self {
            reference,
            genes,
            placements,
            metadata: None,
            scheme: AttributeScheme::for_organism(organism),
            source: "public sequence".to_string(),
            lineage_url_base: None,
            description: DEFAULT_DESCRIPTION.to_string(),
        }
    }

    /// Decorate pre-existing leaves from a metadata table.
    pub fn with_metadata(mut self, metadata: &'a MetadataTable) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Label for samples that were already in the tree (e.g. `GISAID`).
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// Link lineage values to `<base><lineage>`.
    pub fn with_lineage_url_base(mut self, base: impl Into<String>) -> Self {
        self.lineage_url_base = Some(base.into());
        self
    }

    /// Replace the dataset description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Scheme in use.
    pub fn scheme(&self) -> AttributeScheme {
        self.scheme
    }

    /// Build the JSON document for a subtree.
    pub fn to_value(&self, subtree: &SubtreeInfo) -> Result<Value, ExportError> {
        let mut document = Map::new();
        document.insert("version".into(), json!("v2"));
        document.insert("meta".into(), self.meta(&subtree.user_sample_ids));
        document.insert("tree".into(), self.tree(subtree)?);
        Ok(Value::Object(document))
    }

    /// Compact JSON text for a subtree.
    pub fn render(&self, subtree: &SubtreeInfo) -> Result<String, ExportError> {
        Ok(serde_json::to_string(&self.to_value(subtree)?)?)
    }

    /// Write the JSON document to `path`.
    pub fn write(&self, subtree: &SubtreeInfo, path: &Path) -> Result<(), ExportError> {
        let text = self.render(subtree)?;
        fs::write(path, text).map_err(|source| ExportError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(subtree = subtree.number, path = %path.display(), "wrote tree JSON");
        Ok(())
    }

    fn title(user_sample_ids: &[String]) -> String {
        let Some((first, rest)) = user_sample_ids.split_first() else {
            return "Subtree".to_string();
        };
        let mut title = format!("Subtree with {}", first);
        if user_sample_ids.len() > TITLE_LIST_MAX {
            title.push_str(&format!(" and {} other uploaded samples", rest.len()));
        } else {
            for id in rest {
                title.push_str(", ");
                title.push_str(id);
            }
        }
        title
    }

    fn colorings(&self) -> Value {
        let mut user_or_old = categorical("userOrOld", "Sample type");
        user_or_old.insert(
            "scale".into(),
            json!([[UPLOADED_SAMPLE, "#CC0000"], [self.source, "#000000"]]),
        );
        let mut colorings = vec![Value::Object(user_or_old), Value::Object(categorical("gt", "Genotype"))];
        for &field in self.scheme.color_fields() {
            let mut coloring = categorical(field, coloring_title(field, self.scheme));
            let clade_scale = match field {
                "Nextstrain_clade" => self.scheme == AttributeScheme::SarsCov2,
                "Nextstrain_clade_usher" => true,
                _ => false,
            };
            if clade_scale {
                let scale: Vec<Value> = SARS_COV_2_CLADE_COLORS
                    .iter()
                    .map(|(clade, color)| json!([clade, color]))
                    .collect();
                coloring.insert("scale".into(), Value::Array(scale));
            }
            colorings.push(Value::Object(coloring));
        }
        Value::Array(colorings)
    }

    fn genome_annotations(&self) -> Value {
        let mut annotations = Map::new();
        for gene in self.genes {
            let mut entry = Map::new();
            match gene.cds_segments().as_slice() {
                [] => continue,
                [(start, end)] => {
                    entry.insert("start".into(), json!(start + 1));
                    entry.insert("end".into(), json!(end));
                }
                pieces => {
                    let segments: Vec<Value> = pieces
                        .iter()
                        .map(|&(start, end)| json!({"start": start + 1, "end": end}))
                        .collect();
                    entry.insert("segments".into(), Value::Array(segments));
                }
            }
            entry.insert("strand".into(), json!(gene.strand().to_string()));
            entry.insert("type".into(), json!("CDS"));
            annotations.insert(gene.name().to_string(), Value::Object(entry));
        }
        annotations.insert(
            "nuc".into(),
            json!({"start": 1, "end": self.reference.len(), "strand": Strand::Forward.to_string(), "type": "source"}),
        );
        Value::Object(annotations)
    }

    fn meta(&self, user_sample_ids: &[String]) -> Value {
        let mut meta = Map::new();
        meta.insert("title".into(), json!(Self::title(user_sample_ids)));
        meta.insert("description".into(), json!(self.description));
        meta.insert("panels".into(), json!(["tree", "entropy"]));
        meta.insert(
            "display_defaults".into(),
            json!({"branch_label": "aa mutations", "color_by": self.scheme.default_color()}),
        );
        meta.insert("colorings".into(), self.colorings());
        let mut filters = vec!["userOrOld", "country"];
        filters.extend(self.scheme.extra_filters());
        meta.insert("filters".into(), json!(filters));
        meta.insert("genome_annotations".into(), self.genome_annotations());
        Value::Object(meta)
    }

    fn lineage_url(&self, lineage: &str) -> Option<String> {
        if lineage == UPLOADED_SAMPLE {
            return None;
        }
        self.lineage_url_base
            .as_ref()
            .map(|base| format!("{}{}", base, lineage))
    }

    fn leaf_attributes(
        &self,
        name: &str,
        is_user_sample: bool,
        metadata: Option<&SampleMetadata>,
    ) -> NodeAttributes {
        let placement = is_user_sample
            .then(|| self.placements.get(name))
            .flatten();
        let fallback = || is_user_sample.then(|| UPLOADED_SAMPLE.to_string());
        let from_metadata = |field: fn(&SampleMetadata) -> &Option<String>| {
            metadata.and_then(|m| field(m).clone()).or_else(fallback)
        };
        NodeAttributes {
            user_or_old: Some(if is_user_sample {
                UPLOADED_SAMPLE.to_string()
            } else {
                self.source.clone()
            }),
            nextstrain_clade: from_metadata(|m| &m.nextstrain_clade),
            gisaid_clade: from_metadata(|m| &m.gisaid_clade),
            lineage: from_metadata(|m| &m.lineage),
            nextstrain_lineage: from_metadata(|m| &m.nextstrain_lineage),
            nextstrain_clade_usher: placement
                .and_then(|p| p.clade.clone())
                .or_else(|| from_metadata(|m| &m.nextstrain_clade_usher)),
            lineage_usher: placement
                .and_then(|p| p.lineage.clone())
                .or_else(|| from_metadata(|m| &m.lineage_usher)),
        }
    }

    fn leaf_node_attrs(
        &self,
        attrs: &NodeAttributes,
        metadata: Option<&SampleMetadata>,
        out: &mut Map<String, Value>,
    ) {
        let keys = self.scheme.keys();
        let mut put = |key: &str, value: Option<&String>, url: Option<String>| {
            if let Some(value) = value.filter(|v| !v.is_empty()) {
                out.insert(key.to_string(), value_object(value, url));
            }
        };
        let met = |field: fn(&SampleMetadata) -> &Option<String>| metadata.and_then(|m| field(m).as_ref());

        put("userOrOld", attrs.user_or_old.as_ref(), None);
        put("date", met(|m| &m.date), None);
        put("author", met(|m| &m.author), None);
        put(keys.nextstrain_clade, attrs.nextstrain_clade.as_ref(), None);
        put(keys.gisaid_clade, attrs.gisaid_clade.as_ref(), None);
        let lineage_url = attrs.lineage.as_deref().and_then(|l| self.lineage_url(l));
        put(keys.lineage, attrs.lineage.as_ref(), lineage_url);
        put("Nextstrain_lineage", attrs.nextstrain_lineage.as_ref(), None);
        put("gisaid_epi_isl", met(|m| &m.epi_id), None);
        put("genbank_accession", met(|m| &m.genbank), None);
        put("country", met(|m| &m.country), None);
        put("division", met(|m| &m.division), None);
        put("location", met(|m| &m.location), None);
        put("country_exposure", met(|m| &m.country_exposure), None);
        put("division_exposure", met(|m| &m.division_exposure), None);
        put("originating_lab", met(|m| &m.originating_lab), None);
        put("submitting_lab", met(|m| &m.submitting_lab), None);
        put("region", met(|m| &m.region), None);
        put(keys.nextstrain_clade_usher, attrs.nextstrain_clade_usher.as_ref(), None);
        let usher_url = attrs.lineage_usher.as_deref().and_then(|l| self.lineage_url(l));
        put(keys.lineage_usher, attrs.lineage_usher.as_ref(), usher_url);
    }

    fn internal_node_attrs(&self, attrs: &NodeAttributes, out: &mut Map<String, Value>) {
        let keys = self.scheme.keys();
        let fields = [
            ("userOrOld", &attrs.user_or_old),
            (keys.nextstrain_clade, &attrs.nextstrain_clade),
            (keys.gisaid_clade, &attrs.gisaid_clade),
            (keys.lineage, &attrs.lineage),
            ("Nextstrain_lineage", &attrs.nextstrain_lineage),
            (keys.nextstrain_clade_usher, &attrs.nextstrain_clade_usher),
            (keys.lineage_usher, &attrs.lineage_usher),
        ];
        for (key, value) in fields {
            if let Some(value) = value {
                out.insert(key.to_string(), value_object(value, None));
            }
        }
    }

    fn branch_attrs(
        &self,
        tree: &PhyloTree,
        id: NodeId,
        ancestors: &[Snv],
    ) -> Result<Option<Value>, ExportError> {
        let node = tree.node(id);
        let snvs = node.mutations();
        if snvs.is_empty() {
            return Ok(None);
        }
        let aa_changes = amino_acid_changes(snvs, ancestors, self.genes)?;
        let mut attrs = Map::new();
        if !node.is_leaf() {
            attrs.insert("labels".into(), Value::Object(self.branch_labels(node.name(), snvs, &aa_changes)));
        }
        let mut mutations = Map::new();
        for gene in &aa_changes {
            mutations.insert(gene.gene.clone(), json!(gene.changes));
        }
        mutations.insert("nuc".into(), json!(snv_labels(snvs)));
        attrs.insert("mutations".into(), Value::Object(mutations));
        Ok(Some(Value::Object(attrs)))
    }

    fn branch_labels(&self, name: Option<&str>, snvs: &[Snv], aa_changes: &[GeneAaChanges]) -> Map<String, Value> {
        let mut labels = Map::new();
        if let Some(name) = name {
            labels.insert("id".into(), json!(name));
        }
        labels.insert("nuc mutations".into(), json!(snv_labels(snvs).join(",")));
        let back: Vec<String> = snvs
            .iter()
            .filter(|s| {
                self.reference
                    .base(s.position)
                    .is_some_and(|r| s.is_back_mutation(r))
            })
            .map(Snv::to_string)
            .collect();
        labels.insert("back-mutations".into(), json!(back.join(",")));
        let aa = aa_labels(aa_changes.iter());
        if !aa.is_empty() {
            labels.insert("aa mutations".into(), json!(aa));
        }
        let spike = aa_labels(aa_changes.iter().filter(|g| g.gene == "S"));
        if !spike.is_empty() {
            labels.insert("Spike mutations".into(), json!(spike));
        }
        labels
    }

    /// Names for unnamed nodes, numbered in drawing order.
    fn node_names(tree: &PhyloTree) -> Vec<String> {
        let mut names = vec![String::new(); tree.len()];
        let mut next = FIRST_NODE_NUMBER;
        let mut stack = vec![tree.root()];
        while let Some(id) = stack.pop() {
            let node = tree.node(id);
            names[id.index()] = match node.name() {
                Some(name) => name.to_string(),
                None => {
                    next += 1;
                    format!("NODE{}", next - 1)
                }
            };
            // Pushed in file order so the last child is visited first.
            stack.extend(node.children().iter().copied());
        }
        names
    }

    fn ancestor_mutations(tree: &PhyloTree, id: NodeId) -> Vec<Snv> {
        let mut chain: Vec<NodeId> =
            std::iter::successors(tree.node(id).parent(), |&p| tree.node(p).parent()).collect();
        chain.reverse();
        chain
            .into_iter()
            .flat_map(|p| tree.node(p).mutations().iter().copied())
            .collect()
    }

    fn tree(&self, subtree: &SubtreeInfo) -> Result<Value, ExportError> {
        let tree = &subtree.tree;
        let names = Self::node_names(tree);
        let mut divergence = vec![0usize; tree.len()];
        for id in tree.preorder() {
            let parent = tree.node(id).parent().map_or(0, |p| divergence[p.index()]);
            divergence[id.index()] = parent + tree.node(id).mutations().len();
        }

        let mut attributes: Vec<NodeAttributes> = vec![NodeAttributes::default(); tree.len()];
        let mut built: Vec<Option<Value>> = vec![None; tree.len()];
        for id in tree.postorder() {
            let node = tree.node(id);
            let name = &names[id.index()];
            let mut object = Map::new();
            object.insert("name".into(), json!(name));
            let ancestors = Self::ancestor_mutations(tree, id);
            if let Some(branch) = self.branch_attrs(tree, id, &ancestors)? {
                object.insert("branch_attrs".into(), branch);
            }

            let mut node_attrs = Map::new();
            node_attrs.insert("div".into(), json!(divergence[id.index()]));
            if node.is_leaf() {
                let is_user_sample = subtree.contains_user_sample(name);
                let metadata = self.metadata.and_then(|m| m.lookup(name));
                let attrs = self.leaf_attributes(name, is_user_sample, metadata);
                self.leaf_node_attrs(&attrs, metadata, &mut node_attrs);
                attributes[id.index()] = attrs;
            } else {
                let children: Vec<NodeAttributes> = node
                    .children()
                    .iter()
                    .map(|c| std::mem::take(&mut attributes[c.index()]))
                    .collect();
                let attrs = NodeAttributes::majority(&children);
                self.internal_node_attrs(&attrs, &mut node_attrs);
                attributes[id.index()] = attrs;

                let kids: Vec<Value> = node
                    .children()
                    .iter()
                    .rev()
                    .filter_map(|c| built[c.index()].take())
                    .collect();
                object.insert("children".into(), Value::Array(kids));
            }
            object.insert("node_attrs".into(), Value::Object(node_attrs));
            built[id.index()] = Some(Value::Object(object));
        }

        let root = built[tree.root().index()].take().unwrap_or(Value::Null);
        Ok(json!({
            "name": "wrapper",
            "children": [root],
            "node_attrs": {"div": 0},
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::parse_gene_pred;
    use crate::placement::PlacementInfo;
    use crate::tree::parse_subtree_mutations;
    use std::collections::HashMap;

    fn subtree(newick: &str, mutations: &str, users: &[&str]) -> SubtreeInfo {
        let mut tree = PhyloTree::from_newick(newick).unwrap();
        tree.attach_mutations(parse_subtree_mutations(mutations, Path::new("m.txt")).unwrap())
            .unwrap();
        let display_names = tree.leaf_names();
        let leaf_index: HashMap<String, usize> = display_names
            .iter()
            .enumerate()
            .map(|(i, n)| (n.clone(), i))
            .collect();
        SubtreeInfo {
            number: 1,
            tree,
            newick_path: "subtree-1.nh".into(),
            user_sample_ids: users.iter().map(|s| s.to_string()).collect(),
            leaf_index,
            display_names,
        }
    }

    fn reference() -> ReferenceGenome {
        ReferenceGenome::new("chr", b"ATGGATTTTGGGTAAcc")
    }

    #[test]
    fn scheme_follows_organism() {
        assert_eq!(AttributeScheme::for_organism("wuhCor1"), AttributeScheme::SarsCov2);
        assert_eq!(AttributeScheme::for_organism("GCF_000855545.1"), AttributeScheme::Rsv);
        assert_eq!(AttributeScheme::for_organism("hMPXV"), AttributeScheme::Generic);
        assert_eq!(AttributeScheme::SarsCov2.default_color(), "pango_lineage_usher");
        assert_eq!(AttributeScheme::Rsv.default_color(), "GCC_usher");
        assert_eq!(AttributeScheme::Generic.default_color(), "Nextstrain_lineage");
    }

    #[test]
    fn title_lists_or_counts_samples() {
        let ids: Vec<String> = (1..=3).map(|i| format!("s{}", i)).collect();
        assert_eq!(TreeJsonExporter::title(&ids), "Subtree with s1, s2, s3");
        let ids: Vec<String> = (1..=11).map(|i| format!("s{}", i)).collect();
        assert_eq!(
            TreeJsonExporter::title(&ids),
            "Subtree with s1 and 10 other uploaded samples"
        );
    }

    #[test]
    fn tree_layout_and_attributes() {
        let reference = reference();
        let genes =
            parse_gene_pred("g\tchr\t+\t0\t15\t0\t15\t1\t0,\t15,\t0\tS\n", &reference).unwrap();
        let mut placements = Placements::new();
        placements.insert(
            "user1".into(),
            PlacementInfo {
                sample_id: "user1".into(),
                lineage: Some("B.1".into()),
                ..PlacementInfo::default()
            },
        );
        let info = subtree(
            "((user1,old1)n2,old2)n1;",
            "n1: \nn2: A5G,T15A\nuser1: G12A\nold1: \nold2: C16T\n",
            &["user1"],
        );
        let exporter = TreeJsonExporter::new(&reference, &genes, &placements, "wuhCor1")
            .with_source("GISAID")
            .with_lineage_url_base("https://outbreak.info/situation-reports?pango=");
        let doc = exporter.to_value(&info).unwrap();

        assert_eq!(doc["version"], "v2");
        assert_eq!(doc["meta"]["title"], "Subtree with user1");
        assert_eq!(doc["meta"]["display_defaults"]["color_by"], "pango_lineage_usher");
        assert_eq!(doc["meta"]["genome_annotations"]["S"]["start"], 1);
        assert_eq!(doc["meta"]["genome_annotations"]["nuc"]["end"], 17);

        let wrapper = &doc["tree"];
        assert_eq!(wrapper["name"], "wrapper");
        let n1 = &wrapper["children"][0];
        assert_eq!(n1["name"], "n1");
        assert!(n1.get("branch_attrs").is_none());
        // Children come last-first.
        let old2 = &n1["children"][0];
        assert_eq!(old2["name"], "old2");
        let n2 = &n1["children"][1];
        let labels = &n2["branch_attrs"]["labels"];
        assert_eq!(labels["nuc mutations"], "A5G,T15A");
        assert_eq!(labels["aa mutations"], "S:D2G,S:*5K");
        assert_eq!(labels["Spike mutations"], "S:D2G,S:*5K");
        assert_eq!(labels["back-mutations"], "");
        assert_eq!(n2["node_attrs"]["div"], 2);

        let user1 = &n2["children"][1];
        assert_eq!(user1["name"], "user1");
        // G12A is synonymous: nuc list only.
        assert_eq!(user1["branch_attrs"]["mutations"]["nuc"][0], "G12A");
        assert!(user1["branch_attrs"]["mutations"].get("S").is_none());
        assert!(user1["branch_attrs"].get("labels").is_none());
        assert_eq!(user1["node_attrs"]["div"], 3);
        assert_eq!(user1["node_attrs"]["userOrOld"]["value"], UPLOADED_SAMPLE);
        assert_eq!(user1["node_attrs"]["pango_lineage_usher"]["value"], "B.1");
        assert_eq!(
            user1["node_attrs"]["pango_lineage_usher"]["url"],
            "https://outbreak.info/situation-reports?pango=B.1"
        );
        assert_eq!(user1["node_attrs"]["pango_lineage"]["value"], UPLOADED_SAMPLE);
        assert!(user1["node_attrs"]["pango_lineage"].get("url").is_none());

        let old1 = &n2["children"][0];
        assert_eq!(old1["node_attrs"]["userOrOld"]["value"], "GISAID");
        assert!(old1["node_attrs"].get("pango_lineage").is_none());
        // One uploaded and one old child: no majority, all the way up.
        assert!(n2["node_attrs"].get("userOrOld").is_none());
        assert!(n1["node_attrs"].get("userOrOld").is_none());
        assert_eq!(old2["node_attrs"]["userOrOld"]["value"], "GISAID");
    }

    #[test]
    fn genome_annotations_span_the_coding_region() {
        let reference = ReferenceGenome::new("chr", b"ccATGAAAggTTTGGGCCCTAAcc");
        let genes = parse_gene_pred(
            "a\tchr\t+\t0\t19\t2\t17\t1\t0,\t19,\t0\tS\n\
             b\tchr\t+\t0\t24\t2\t22\t2\t0,10,\t8,24,\t0\tORF1\n",
            &reference,
        )
        .unwrap();
        let placements = Placements::new();
        let exporter = TreeJsonExporter::new(&reference, &genes, &placements, "wuhCor1");
        let annotations = exporter.genome_annotations();
        assert_eq!(
            annotations["S"],
            json!({"start": 3, "end": 17, "strand": "+", "type": "CDS"})
        );
        assert_eq!(
            annotations["ORF1"]["segments"],
            json!([{"start": 3, "end": 8}, {"start": 11, "end": 22}])
        );
        assert!(annotations["ORF1"].get("start").is_none());
    }

    #[test]
    fn unnamed_nodes_are_numbered_in_drawing_order() {
        let tree = PhyloTree::from_newick("((a,b),(c,d));").unwrap();
        let names = TreeJsonExporter::node_names(&tree);
        // Root first, then the last child before the first.
        assert_eq!(names[tree.root().index()], "NODE10000");
        let children = tree.node(tree.root()).children();
        assert_eq!(names[children[1].index()], "NODE10001");
        assert_eq!(names[children[0].index()], "NODE10002");
    }

    #[test]
    fn back_mutations_are_labelled() {
        let reference = reference();
        let placements = Placements::new();
        let info = subtree("((u)n2)n1;", "n1: A1C\nn2: C1A\nu: \n", &["u"]);
        let exporter = TreeJsonExporter::new(&reference, &[], &placements, "other");
        let doc = exporter.to_value(&info).unwrap();
        let n2 = &doc["tree"]["children"][0]["children"][0];
        assert_eq!(n2["branch_attrs"]["labels"]["back-mutations"], "C1A");
        assert_eq!(n2["node_attrs"]["userOrOld"]["value"], UPLOADED_SAMPLE);
    }
}
