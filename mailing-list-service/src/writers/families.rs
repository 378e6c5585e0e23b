//! Secondary-index and by-external-ID family name constants shared across
//! writers (§4.1).

pub const LIST_BY_SERVICE: &str = "lookup/list-by-service";
pub const LIST_BY_PROJECT: &str = "lookup/list-by-project";
pub const LIST_BY_COMMITTEE: &str = "lookup/list-by-committee";
pub const MEMBER_BY_LIST: &str = "lookup/member-by-list";

pub const SERVICE_BY_GROUP: &str = "service-by-group";
pub const LIST_BY_SUBGROUP: &str = "list-by-subgroup";
pub const MEMBER_BY_PROVIDER_ID: &str = "member-by-provider-id";
