use serde::Deserialize;

/// WSAPI wraps every query response in a `QueryResult` envelope; operation
/// errors arrive inside it with HTTP 200.
#[derive(Debug, Deserialize)]
pub struct QueryEnvelope<T> {
    #[serde(rename = "QueryResult")]
    pub query_result: QueryResult<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct QueryResult<T> {
    #[serde(default)]
    pub total_result_count: u64,
    // Path form so the derive does not infer a `T: Default` bound.
    #[serde(default = "Vec::new")]
    pub results: Vec<T>,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateEnvelope<T> {
    #[serde(rename = "CreateResult")]
    pub create_result: CreateResult<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateResult<T> {
    pub object: Option<T>,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct RawWorkspace {
    #[serde(rename = "_ref")]
    pub obj_ref: String,
    #[serde(rename = "Name", alias = "_refObjectName", default)]
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct RawProject {
    #[serde(rename = "_ref")]
    pub obj_ref: String,
    #[serde(rename = "Name", alias = "_refObjectName", default)]
    pub name: String,
}

/// Build record as stored by the tracker. `Number` is a string there, even
/// though the CI side issues integers.
#[derive(Debug, Deserialize)]
pub struct RawTrackerBuild {
    #[serde(rename = "_ref")]
    pub obj_ref: String,
    #[serde(rename = "Number")]
    pub number: String,
    #[serde(rename = "Status", default)]
    pub status: String,
    #[serde(rename = "BuildDefinition", default)]
    pub build_definition: Option<RawBuildDefinition>,
}

#[derive(Debug, Deserialize)]
pub struct RawBuildDefinition {
    #[serde(rename = "_ref")]
    pub obj_ref: String,
    #[serde(rename = "Name", alias = "_refObjectName", default)]
    pub name: String,
    #[serde(rename = "Project", default)]
    pub project: Option<RawProject>,
}

#[derive(Debug, Deserialize)]
pub struct RawChangeset {
    #[serde(rename = "_ref")]
    pub obj_ref: String,
    #[serde(rename = "Revision", default)]
    pub revision: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_envelope_parse() {
        let payload = r#"{
            "QueryResult": {
                "TotalResultCount": 1,
                "Results": [
                    {
                        "_ref": "https://rally1.rallydev.com/slm/webservice/v2.0/build/111",
                        "Number": "45",
                        "Status": "SUCCESS",
                        "BuildDefinition": {
                            "_ref": "https://rally1.rallydev.com/slm/webservice/v2.0/builddefinition/22",
                            "Name": "Don Camillo",
                            "Project": {
                                "_ref": "https://rally1.rallydev.com/slm/webservice/v2.0/project/3",
                                "Name": "Rally Fernandel"
                            }
                        }
                    }
                ],
                "Errors": [],
                "Warnings": []
            }
        }"#;

        let envelope: QueryEnvelope<RawTrackerBuild> = serde_json::from_str(payload).unwrap();
        let result = envelope.query_result;

        assert_eq!(result.total_result_count, 1);
        assert!(result.errors.is_empty());
        let build = &result.results[0];
        assert_eq!(build.number, "45");
        let defn = build.build_definition.as_ref().unwrap();
        assert_eq!(defn.name, "Don Camillo");
        assert_eq!(defn.project.as_ref().unwrap().name, "Rally Fernandel");
    }

    #[test]
    fn test_query_envelope_tolerates_missing_collections() {
        let payload = r#"{"QueryResult": {"TotalResultCount": 0}}"#;
        let envelope: QueryEnvelope<RawTrackerBuild> = serde_json::from_str(payload).unwrap();
        let result = envelope.query_result;

        assert_eq!(result.total_result_count, 0);
        assert!(result.results.is_empty());
        assert!(result.errors.is_empty());
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_ref_object_name_alias() {
        let payload = r#"{
            "_ref": "https://rally1.rallydev.com/slm/webservice/v2.0/builddefinition/22",
            "_refObjectName": "Don Camillo"
        }"#;
        let defn: RawBuildDefinition = serde_json::from_str(payload).unwrap();
        assert_eq!(defn.name, "Don Camillo");
    }

    #[test]
    fn test_create_envelope_with_errors() {
        let payload = r#"{
            "CreateResult": {
                "Object": null,
                "Errors": ["Validation error: Number is required"],
                "Warnings": []
            }
        }"#;
        let envelope: CreateEnvelope<RawTrackerBuild> = serde_json::from_str(payload).unwrap();
        assert!(envelope.create_result.object.is_none());
        assert_eq!(envelope.create_result.errors.len(), 1);
    }
}
