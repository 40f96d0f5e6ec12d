use serde_json::json;

use kira_culture_enrich::adapters::{cas, chebi, pubchem};
use kira_culture_enrich::domain::{IdentifierType, SourceId};
use kira_culture_enrich::entity::SourceRecord;

fn field(record: &SourceRecord, name: &str) -> Option<String> {
    record.fields.get(name).map(ToString::to_string)
}

#[test]
fn pubchem_properties_become_one_record_per_cid() {
    let body = json!({
        "PropertyTable": {
            "Properties": [
                {
                    "CID": 24083,
                    "MolecularFormula": "MgO4S",
                    "MolecularWeight": "120.37",
                    "InChIKey": "CSNNHWWHGAXBCP-UHFFFAOYSA-L",
                    "IUPACName": "magnesium;sulfate",
                    "SMILES": "[O-]S(=O)(=O)[O-].[Mg+2]"
                },
                {"MolecularFormula": "no cid, skipped"}
            ]
        }
    });

    let records = pubchem::parse_properties(&body);
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.source_id, SourceId::Pubchem);
    assert_eq!(record.native_identifier, "24083");
    assert_eq!(field(record, "pubchem_cid").as_deref(), Some("24083"));
    assert_eq!(
        field(record, "inchikey").as_deref(),
        Some("CSNNHWWHGAXBCP-UHFFFAOYSA-L")
    );
    assert_eq!(field(record, "smiles").as_deref(), Some("[O-]S(=O)(=O)[O-].[Mg+2]"));
    assert_eq!(field(record, "molecular_weight").as_deref(), Some("120.37"));

    let kinds = record
        .identifiers()
        .into_iter()
        .map(|identifier| identifier.kind)
        .collect::<Vec<_>>();
    assert!(kinds.contains(&IdentifierType::PubchemCid));
    assert!(kinds.contains(&IdentifierType::Inchikey));

    assert!(pubchem::parse_properties(&json!({"Fault": {"Code": "PUGREST.NotFound"}})).is_empty());
}

#[test]
fn chebi_compound_carries_structure_and_cas() {
    let body = json!({
        "chebi_accession": "CHEBI:32599",
        "name": "magnesium sulfate",
        "definition": "A magnesium salt having sulfate as the counterion.",
        "default_structure": {"standard_inchi_key": "CSNNHWWHGAXBCP-UHFFFAOYSA-L"},
        "chemical_data": {"formula": "MgO4S"},
        "database_accessions": {
            "CAS": [
                {"accession_number": "not-a-cas"},
                {"accession_number": "7487-88-9"}
            ]
        }
    });

    let record = &chebi::parse_compound(&body).unwrap();
    assert_eq!(record.native_identifier, "CHEBI:32599");
    assert_eq!(field(record, "name").as_deref(), Some("magnesium sulfate"));
    assert_eq!(field(record, "cas_rn").as_deref(), Some("7487-88-9"));
    assert_eq!(field(record, "molecular_formula").as_deref(), Some("MgO4S"));
    assert_eq!(
        field(record, "inchikey").as_deref(),
        Some("CSNNHWWHGAXBCP-UHFFFAOYSA-L")
    );

    assert!(chebi::parse_compound(&json!({"name": "no accession"})).is_none());
}

#[test]
fn chebi_name_search_keeps_exact_hits_only() {
    let body = json!({
        "results": [
            {"_source": {"chebi_accession": "CHEBI:32599", "name": "Magnesium Sulfate"}},
            {"_source": {"chebi_accession": "CHEBI:31795", "name": "magnesium sulfate heptahydrate"}}
        ]
    });

    let by_name = chebi::parse_search(&body, IdentifierType::Name, "magnesium sulfate");
    assert_eq!(by_name.len(), 1);
    assert_eq!(field(&by_name[0], "chebi_id").as_deref(), Some("CHEBI:32599"));

    let by_cas = chebi::parse_search(&body, IdentifierType::CasRn, "7487-88-9");
    assert_eq!(by_cas.len(), 2);
}

#[test]
fn cas_detail_strips_markup() {
    let body = json!({
        "rn": "50-99-7",
        "name": "<em>D</em>-Glucose",
        "inchiKey": "InChIKey=WQZGKKKJIJFFOK-GASJEMHNSA-N",
        "molecularFormula": "C<sub>6</sub>H<sub>12</sub>O<sub>6</sub>",
        "molecularMass": "180.16"
    });

    let record = &cas::parse_detail(&body).unwrap();
    assert_eq!(record.source_id, SourceId::Cas);
    assert_eq!(record.native_identifier, "50-99-7");
    assert_eq!(field(record, "name").as_deref(), Some("D-Glucose"));
    assert_eq!(field(record, "molecular_formula").as_deref(), Some("C6H12O6"));
    assert_eq!(field(record, "molecular_weight").as_deref(), Some("180.16"));

    assert!(cas::parse_detail(&json!({"rn": "50-99-1"})).is_none());
}

#[test]
fn cas_search_prefers_exact_names() {
    let body = json!({
        "results": [
            {"rn": "50-99-7", "name": "D-Glucose"},
            {"rn": "492-62-6", "name": "α-D-Glucose"}
        ]
    });
    let exact = cas::parse_search(&body, "d-glucose");
    assert_eq!(exact.len(), 1);
    assert_eq!(exact[0].native_identifier, "50-99-7");

    let loose = cas::parse_search(&body, "glucose");
    assert_eq!(loose.len(), 2);
}
