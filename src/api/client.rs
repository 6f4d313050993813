use std::{
    fs, io,
    path::{Path, PathBuf},
    thread,
};

use rand::Rng;
use reqwest::{
    blocking::{self, multipart, Client, RequestBuilder, Response},
    header::AUTHORIZATION,
    StatusCode,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use url::Url;

use crate::{config::ApiConfig, errors::RequestFailure};

use super::errors::ApiClientError;
use super::models::{Job, Page, TokenResponse, Upload, User};

/// Blocking client for the Calculation Engine REST API.
///
/// Holds the immutable configuration and the auth token resolved at
/// construction time. There is no token refresh; once it expires every
/// call fails with the server's response. Not synchronized for use from
/// multiple threads.
pub struct ApiClient {
    config: ApiConfig,
    url_base: Url,
    api_base: Url,
    token: String,
    client: Client,
}

fn join_segments<'a>(
    base: &Url,
    segments: impl IntoIterator<Item = &'a str>,
) -> Result<Url, ApiClientError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| ApiClientError::CannotBeBase(base.clone()))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// Parse a success body as JSON; any other status comes back as a
/// [`RequestFailure`] carrying the raw body for the caller to log or
/// ignore. A 2xx body that is not valid JSON is logged and surfaced the
/// same way.
fn json_ok<T: DeserializeOwned>(url: Url, response: Response) -> Result<T, ApiClientError> {
    let status = response.status();
    if !status.is_success() {
        return Err(RequestFailure::new(url, status, response.text()?).into());
    }
    let text = response.text()?;
    serde_json::from_str(&text).map_err(|err| {
        log::error!("Failed to parse response from {url}: {err}");
        log::debug!("Response body: {text}");
        ApiClientError::from(RequestFailure::new(url, status, text))
    })
}

fn check_ok(url: Url, response: Response) -> Result<(), ApiClientError> {
    let status = response.status();
    if status.is_success() {
        Ok(())
    } else {
        Err(RequestFailure::new(url, status, response.text()?).into())
    }
}

fn exchange_token(
    client: &Client,
    api_base: &Url,
    config: &ApiConfig,
) -> Result<String, ApiClientError> {
    let url = join_segments(api_base, ["token", ""])?;
    let response = client
        .post(url.clone())
        .json(&serde_json::json!({
            "username": config.username,
            "password": config.password,
        }))
        .send()?;
    let data: TokenResponse = json_ok(url, response)?;
    Ok(data.token)
}

fn generate_job_name() -> String {
    format!("test-{}", rand::thread_rng().gen_range(10000..99999))
}

impl ApiClient {
    /// # Errors
    ///
    /// Fails if the configured authority does not form a base URL, or if
    /// the token exchange is needed and does not succeed.
    pub fn new(config: ApiConfig) -> Result<Self, ApiClientError> {
        let url_base = Url::parse(&config.url_base())?;
        // Test here so that path_segments_mut succeeds in every builder
        if url_base.cannot_be_a_base() {
            return Err(ApiClientError::CannotBeBase(url_base));
        }
        let api_base = join_segments(
            &url_base,
            config.basepath.split('/').filter(|s| !s.is_empty()),
        )?;
        let client = blocking::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        let token = match config.token.as_deref() {
            Some(token) if !token.is_empty() => token.to_owned(),
            _ => exchange_token(&client, &api_base, &config)?,
        };
        Ok(Self {
            config,
            url_base,
            api_base,
            token,
            client,
        })
    }

    /// The bearer token attached to every resource call.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Send a request, resending after a fixed `1 / rate_limit` sleep for
    /// as long as the server answers 429. Unbounded unless
    /// `retry_limit` is configured; when the cap is reached the throttled
    /// response itself is returned for the caller to convert.
    fn send<F>(&self, build: F) -> Result<Response, ApiClientError>
    where
        F: Fn() -> RequestBuilder,
    {
        let delay = self.config.rate_limit_delay();
        let mut retries = 0usize;
        loop {
            let response = build()
                .header(AUTHORIZATION, format!("Token {}", self.token))
                .send()?;
            if response.status() != StatusCode::TOO_MANY_REQUESTS {
                return Ok(response);
            }
            if let Some(limit) = self.config.retry_limit {
                if retries >= limit {
                    log::error!("Rate limit retries exhausted after {limit} attempts");
                    return Ok(response);
                }
            }
            retries += 1;
            log::debug!("Response code 429 received. Rate limiter engaged.");
            thread::sleep(delay);
        }
    }

    /// Follow `next` links from `first`, concatenating every page's
    /// `results` in encounter order until the server reports no further
    /// page.
    fn collect_pages<T: DeserializeOwned>(&self, first: Url) -> Result<Vec<T>, ApiClientError> {
        let mut items = Vec::new();
        let mut next = Some(first);
        while let Some(url) = next {
            let response = self.send(|| self.client.get(url.clone()))?;
            let page: Page<T> = json_ok(url, response)?;
            items.extend(page.results);
            log::debug!("Next page of results: {:?}", page.next);
            next = match page.next.as_deref() {
                Some(n) if !n.is_empty() => Some(Url::parse(n)?),
                _ => None,
            };
        }
        Ok(items)
    }

    pub fn jobs_url(&self) -> Result<Url, ApiClientError> {
        join_segments(&self.api_base, ["ce", "job", ""])
    }

    pub fn job_url(&self, id: &str) -> Result<Url, ApiClientError> {
        join_segments(&self.api_base, ["ce", "job", id, ""])
    }

    pub fn uploads_url(&self) -> Result<Url, ApiClientError> {
        join_segments(&self.api_base, ["ce", "upload", ""])
    }

    pub fn upload_url(&self, id: &str) -> Result<Url, ApiClientError> {
        join_segments(&self.api_base, ["ce", "upload", id, ""])
    }

    pub fn users_url(&self) -> Result<Url, ApiClientError> {
        join_segments(&self.api_base, ["user", ""])
    }

    pub fn user_url(&self, username: &str) -> Result<Url, ApiClientError> {
        join_segments(&self.api_base, ["user", username, ""])
    }

    pub fn metrics_url(&self) -> Result<Url, ApiClientError> {
        join_segments(&self.api_base, ["ce", "metrics", ""])
    }

    pub fn modules_url(&self) -> Result<Url, ApiClientError> {
        join_segments(&self.api_base, ["ce", "module", ""])
    }

    /// Download URLs hang off the bare authority, not the API base path.
    pub fn download_url(&self, id: &str, path: &str) -> Result<Url, ApiClientError> {
        let rel = path.trim_matches('/');
        let mut url = self.url_base.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| ApiClientError::CannotBeBase(self.url_base.clone()))?;
            segments.pop_if_empty().extend(["ce", "download", id]);
            if !rel.is_empty() {
                segments.extend(rel.split('/'));
            }
        }
        Ok(url)
    }

    /// Create a job. An empty `name` gets a generated `test-NNNNN`
    /// placeholder, matching what the engine's own tooling does.
    pub fn create_job(
        &self,
        name: &str,
        description: &str,
        config: Value,
    ) -> Result<Job, ApiClientError> {
        let name = if name.is_empty() {
            generate_job_name()
        } else {
            name.to_owned()
        };
        let url = self.jobs_url()?;
        let body = serde_json::json!({
            "name": name,
            "config": config,
            "description": description,
        });
        let response = self.send(|| self.client.post(url.clone()).json(&body))?;
        json_ok(url, response)
    }

    pub fn get_job(&self, id: &str) -> Result<Job, ApiClientError> {
        let url = self.job_url(id)?;
        let response = self.send(|| self.client.get(url.clone()))?;
        json_ok(url, response)
    }

    /// All jobs, across every page of results.
    pub fn list_jobs(&self) -> Result<Vec<Job>, ApiClientError> {
        self.collect_pages(self.jobs_url()?)
    }

    /// Patch the narrow set of flags the API lets clients change. Fields
    /// left as `None` are omitted from the payload entirely.
    pub fn update_job(
        &self,
        id: &str,
        saved: Option<bool>,
        public: Option<bool>,
    ) -> Result<Job, ApiClientError> {
        let mut body = serde_json::Map::new();
        if let Some(saved) = saved {
            body.insert("saved".to_owned(), Value::Bool(saved));
        }
        if let Some(public) = public {
            body.insert("public".to_owned(), Value::Bool(public));
        }
        let url = self.job_url(id)?;
        let response = self.send(|| self.client.patch(url.clone()).json(&body))?;
        json_ok(url, response)
    }

    pub fn delete_job(&self, id: &str) -> Result<(), ApiClientError> {
        let url = self.job_url(id)?;
        let response = self.send(|| self.client.delete(url.clone()))?;
        check_ok(url, response)
    }

    /// Delete every job the listing returns, in listed order. A refusal
    /// for an individual job is logged and the sweep keeps going;
    /// transport errors abort it. Returns the number deleted.
    pub fn delete_all_jobs(&self) -> Result<usize, ApiClientError> {
        let jobs = self.list_jobs()?;
        let mut deleted = 0;
        for job in jobs {
            log::debug!("Deleting job {}", job.uuid);
            match self.delete_job(&job.uuid) {
                Ok(()) => deleted += 1,
                Err(ApiClientError::Failure(failure)) => log::error!("{failure}"),
                Err(err) => return Err(err),
            }
        }
        Ok(deleted)
    }

    /// Upload a local file to `upload_path` on the server.
    pub fn upload_file(
        &self,
        file_path: &Path,
        upload_path: &str,
        description: &str,
        public: bool,
    ) -> Result<Upload, ApiClientError> {
        let bytes = fs::read(file_path)?;
        let file_name = file_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_owned());
        self.put_upload(&bytes, &file_name, upload_path, description, public)
    }

    /// Upload an in-memory dataset (e.g. CSV bytes) as a server-side file.
    pub fn upload_data(
        &self,
        data: &[u8],
        upload_path: &str,
        description: &str,
        public: bool,
    ) -> Result<Upload, ApiClientError> {
        let file_name = upload_path
            .rsplit('/')
            .find(|n| !n.is_empty())
            .unwrap_or("upload");
        self.put_upload(data, file_name, upload_path, description, public)
    }

    fn put_upload(
        &self,
        bytes: &[u8],
        file_name: &str,
        upload_path: &str,
        description: &str,
        public: bool,
    ) -> Result<Upload, ApiClientError> {
        let url = self.uploads_url()?;
        // The form is rebuilt per attempt; multipart bodies can't be
        // replayed by reqwest.
        let response = self.send(|| {
            let part = multipart::Part::bytes(bytes.to_vec()).file_name(file_name.to_owned());
            let form = multipart::Form::new()
                .part("file", part)
                .text("path", upload_path.to_owned())
                .text("description", description.to_owned())
                .text("public", public.to_string());
            self.client.put(url.clone()).multipart(form)
        })?;
        json_ok(url, response)
    }

    pub fn get_upload(&self, id: &str) -> Result<Upload, ApiClientError> {
        let url = self.upload_url(id)?;
        let response = self.send(|| self.client.get(url.clone()))?;
        json_ok(url, response)
    }

    pub fn list_uploads(&self) -> Result<Vec<Upload>, ApiClientError> {
        self.collect_pages(self.uploads_url()?)
    }

    /// Patch visibility and/or description. Fields left as `None` are
    /// omitted from the form payload entirely.
    pub fn update_upload(
        &self,
        id: &str,
        public: Option<bool>,
        description: Option<&str>,
    ) -> Result<Upload, ApiClientError> {
        let mut form: Vec<(&str, String)> = Vec::new();
        if let Some(public) = public {
            form.push(("public", public.to_string()));
        }
        if let Some(description) = description {
            form.push(("description", description.to_owned()));
        }
        let url = self.upload_url(id)?;
        let response = self.send(|| self.client.patch(url.clone()).form(&form))?;
        json_ok(url, response)
    }

    pub fn delete_upload(&self, id: &str) -> Result<(), ApiClientError> {
        let url = self.upload_url(id)?;
        let response = self.send(|| self.client.delete(url.clone()))?;
        check_ok(url, response)
    }

    /// Stream one of a job's output files to
    /// `{root_dir}/{job_id}/{path}`, creating parent directories as
    /// needed. Returns the path written.
    ///
    /// # Errors
    ///
    /// Unlike the JSON endpoints, a non-success status here does
    /// propagate as an error; there is no partial file to salvage.
    pub fn download_job_file(
        &self,
        job_id: &str,
        path: &str,
        root_dir: &Path,
    ) -> Result<PathBuf, ApiClientError> {
        let url = self.download_url(job_id, path)?;
        let dest = root_dir.join(job_id).join(path.trim_matches('/'));
        self.stream_to_file(url, &dest)?;
        Ok(dest)
    }

    /// Download an uploaded file into `{root_dir}/{id}/{stored path}`.
    ///
    /// Returns `Ok(None)` without writing anything when the upload record
    /// can't be found or has no stored path; both conditions are logged.
    pub fn download_uploaded_file(
        &self,
        id: &str,
        root_dir: &Path,
    ) -> Result<Option<PathBuf>, ApiClientError> {
        let upload = match self.get_upload(id) {
            Ok(upload) => upload,
            Err(ApiClientError::Failure(failure)) => {
                log::error!("Upload not found: {failure}");
                return Ok(None);
            }
            Err(err) => return Err(err),
        };
        let Some(path) = upload
            .path
            .as_deref()
            .map(|p| p.trim_matches('/'))
            .filter(|p| !p.is_empty())
        else {
            log::error!("Upload {id} has no stored path");
            return Ok(None);
        };
        let url = self.download_url(id, "")?;
        let dest = root_dir.join(id).join(path);
        self.stream_to_file(url, &dest)?;
        Ok(Some(dest))
    }

    fn stream_to_file(&self, url: Url, dest: &Path) -> Result<(), ApiClientError> {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        let delay = self.config.rate_limit_delay();
        let mut retries = 0usize;
        let mut response = loop {
            let response = self
                .client
                .get(url.clone())
                .header(AUTHORIZATION, format!("Token {}", self.token))
                .send()?;
            if response.status() == StatusCode::TOO_MANY_REQUESTS
                && retries < self.config.download_retry_limit
            {
                retries += 1;
                log::debug!("Response code 429 received. Rate limiter engaged.");
                thread::sleep(delay);
                continue;
            }
            break response.error_for_status()?;
        };
        let mut file = fs::File::create(dest)?;
        io::copy(&mut response, &mut file)?;
        Ok(())
    }

    /// Fetch a job output file into memory as text, e.g. a CSV result to
    /// feed into further analysis.
    pub fn fetch_job_file(&self, job_id: &str, path: &str) -> Result<String, ApiClientError> {
        let url = self.download_url(job_id, path)?;
        let response = self.send(|| self.client.get(url.clone()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(RequestFailure::new(url, status, response.text()?).into());
        }
        Ok(response.text()?)
    }

    pub fn list_users(&self) -> Result<Value, ApiClientError> {
        let url = self.users_url()?;
        let response = self.send(|| self.client.get(url.clone()))?;
        json_ok(url, response)
    }

    /// Create a user account. Empty first/last names default to the
    /// username, and the email is derived from it.
    pub fn create_user(
        &self,
        username: &str,
        password: &str,
        first_name: &str,
        last_name: &str,
        is_staff: bool,
    ) -> Result<User, ApiClientError> {
        let first = if first_name.is_empty() {
            username
        } else {
            first_name
        };
        let last = if last_name.is_empty() {
            username
        } else {
            last_name
        };
        let url = self.users_url()?;
        let body = serde_json::json!({
            "username": username,
            "email": format!("{username}@example.com"),
            "is_staff": is_staff,
            "first_name": first,
            "last_name": last,
            "password": password,
        });
        let response = self.send(|| self.client.post(url.clone()).json(&body))?;
        json_ok(url, response)
    }

    pub fn delete_user(&self, username: &str) -> Result<(), ApiClientError> {
        let url = self.user_url(username)?;
        let response = self.send(|| self.client.delete(url.clone()))?;
        check_ok(url, response)
    }

    /// Engine metrics, across every page of results.
    pub fn list_metrics(&self) -> Result<Vec<Value>, ApiClientError> {
        self.collect_pages(self.metrics_url()?)
    }

    /// Calculation modules installed on the engine.
    pub fn list_modules(&self) -> Result<Value, ApiClientError> {
        let url = self.modules_url()?;
        let response = self.send(|| self.client.get(url.clone()))?;
        json_ok(url, response)
    }

    /// Session login against the admin interface using the configured
    /// credentials. Kept for parity with the admin tooling; resource
    /// calls rely on the token header instead.
    pub fn login(&self) -> Result<Value, ApiClientError> {
        let url = join_segments(&self.url_base, ["admin", "login", ""])?;
        let response = self
            .client
            .post(url.clone())
            .basic_auth(&self.config.username, Some(&self.config.password))
            .send()?;
        json_ok(url, response)
    }
}

#[cfg(test)]
mod tests {
    use super::generate_job_name;

    #[test]
    fn generated_job_names_are_in_range() {
        for _ in 0..64 {
            let name = generate_job_name();
            let n: u32 = name.strip_prefix("test-").unwrap().parse().unwrap();
            assert!((10000..99999).contains(&n), "{name}");
        }
    }
}
