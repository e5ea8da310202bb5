use axum::{
    extract::Request,
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};

/// Identity of the caller, as established by the authenticating proxy
#[derive(Clone, Debug)]
pub struct RequestContext {
    pub tenant: String,
    pub user: String,
    pub auth_token: String,
    pub roles: Vec<String>,
}

impl RequestContext {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r.eq_ignore_ascii_case(role))
    }
}

fn header<'a>(headers: &'a HeaderMap, names: &[&str]) -> Option<&'a str> {
    names
        .iter()
        .find_map(|name| headers.get(*name))
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Auth middleware - extracts the request context from identity headers
///
/// An authenticating proxy in front of env-api validates the caller's token
/// and sets the identity headers (`X-Tenant-Id`/`X-Project-Id`,
/// `X-User-Id`, `X-Roles`). The raw token is passed along in
/// `X-Auth-Token` so deployments can act with the caller's credentials.
pub async fn auth_middleware(mut req: Request, next: Next) -> Result<Response, StatusCode> {
    let headers = req.headers();

    let tenant = header(headers, &["x-tenant-id", "x-project-id"]).map(str::to_string);
    let user = header(headers, &["x-user-id", "x-user"]).map(str::to_string);
    let auth_token = header(headers, &["x-auth-token"])
        .unwrap_or_default()
        .to_string();
    let roles = header(headers, &["x-roles"])
        .map(|s| {
            s.split(',')
                .map(|r| r.trim().to_string())
                .filter(|r| !r.is_empty())
                .collect()
        })
        .unwrap_or_default();

    // Without a tenant and a user there is nobody to scope the request to
    let (Some(tenant), Some(user)) = (tenant, user) else {
        return Err(StatusCode::UNAUTHORIZED);
    };

    req.extensions_mut().insert(RequestContext {
        tenant,
        user,
        auth_token,
        roles,
    });

    Ok(next.run(req).await)
}
