use reqwest::RequestBuilder;

/// Identity headers the platform's upstream auth middleware would normally set.
#[derive(Debug, Clone)]
pub struct Tenant {
    pub user_id: String,
    pub org_id: String,
    pub bu_id: String,
}

impl Tenant {
    pub fn new(user_id: &str, org_id: &str, bu_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            org_id: org_id.to_string(),
            bu_id: bu_id.to_string(),
        }
    }

    pub fn headers(&self) -> [(&'static str, &str); 3] {
        [
            ("x-user-id", &self.user_id),
            ("x-organization-id", &self.org_id),
            ("x-business-unit-id", &self.bu_id),
        ]
    }

    pub fn apply(&self, request: RequestBuilder) -> RequestBuilder {
        self.headers()
            .into_iter()
            .fold(request, |request, (name, value)| request.header(name, value))
    }
}
