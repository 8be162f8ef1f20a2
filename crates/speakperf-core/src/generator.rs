//! k6 script generation.
//!
//! Scripts are plain string templates. Every interpolated value goes through
//! [`js_string`], and every HTTP request carries a `name` tag equal to the
//! endpoint path so the metrics stream groups per endpoint.

use crate::model::TestKind;
use std::fmt::Write as _;

pub const DEFAULT_ENDPOINTS: &[&str] = &["/", "/api/health", "/api/v3/pet"];
pub const FALLBACK_PORT: &str = "8080";
pub const PREVIEW_CHARS: usize = 200;

/// Execution profile for generated API tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadProfile {
    Load,
    Stress,
    Spike,
}

impl LoadProfile {
    /// Unknown names fall back to `Load`.
    pub fn parse(test_type: &str) -> Self {
        match test_type.trim().to_ascii_lowercase().as_str() {
            "stress" => LoadProfile::Stress,
            "spike" => LoadProfile::Spike,
            _ => LoadProfile::Load,
        }
    }

    pub fn kind(&self) -> TestKind {
        match self {
            LoadProfile::Load => TestKind::Load,
            LoadProfile::Stress => TestKind::Stress,
            LoadProfile::Spike => TestKind::Spike,
        }
    }

    /// Executor name and the scenario body lines that go with it.
    fn scenario(&self) -> (&'static str, &'static str) {
        match self {
            LoadProfile::Load => (
                "constant-vus",
                "      vus: 10,\n      duration: '30s',\n",
            ),
            LoadProfile::Stress => (
                "ramping-vus",
                "      stages: [\n        { duration: '2m', target: 100 },\n        { duration: '5m', target: 100 },\n        { duration: '2m', target: 0 },\n      ],\n",
            ),
            LoadProfile::Spike => (
                "ramping-arrival-rate",
                "      startRate: 10,\n      timeUnit: '1s',\n      preAllocatedVUs: 50,\n      maxVUs: 200,\n      stages: [\n        { duration: '30s', target: 10 },\n        { duration: '10s', target: 100 },\n        { duration: '30s', target: 10 },\n      ],\n",
            ),
        }
    }
}

/// Load level for the automated flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intensity {
    Quick,
    Standard,
    Thorough,
}

impl Intensity {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "quick" => Some(Intensity::Quick),
            "standard" => Some(Intensity::Standard),
            "thorough" => Some(Intensity::Thorough),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Intensity::Quick => "quick",
            Intensity::Standard => "standard",
            Intensity::Thorough => "thorough",
        }
    }

    pub fn virtual_users(&self) -> u32 {
        match self {
            Intensity::Quick => 10,
            Intensity::Standard => 50,
            Intensity::Thorough => 100,
        }
    }

    pub fn duration(&self) -> &'static str {
        match self {
            Intensity::Quick => "30s",
            Intensity::Standard => "2m",
            Intensity::Thorough => "5m",
        }
    }
}

/// Trimmed, non-empty csv entries; `None` or an all-blank list gives the
/// default endpoint set.
pub fn parse_endpoints(csv: Option<&str>) -> Vec<String> {
    let parsed: Vec<String> = csv
        .unwrap_or("")
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect();
    if parsed.is_empty() {
        DEFAULT_ENDPOINTS.iter().map(|s| s.to_string()).collect()
    } else {
        parsed
    }
}

/// `scheme://host[:port]` of an absolute spec URL, else the probe host on
/// the fallback port.
pub fn base_url_for_spec(spec_url: &str, probe_host: &str) -> String {
    match reqwest::Url::parse(spec_url) {
        Ok(url) if url.has_host() && matches!(url.scheme(), "http" | "https") => {
            let host = url.host_str().unwrap_or(probe_host);
            match url.port() {
                Some(port) => format!("{}://{}:{}", url.scheme(), host, port),
                None => format!("{}://{}", url.scheme(), host),
            }
        }
        _ => format!("http://{probe_host}:{FALLBACK_PORT}"),
    }
}

pub fn api_test_name(now: chrono::DateTime<chrono::Utc>) -> String {
    format!("api-test-{}", now.format("%Y%m%d-%H%M%S"))
}

/// Scenario-based API test for one spec.
pub fn generate_api_test(
    spec_id: i64,
    base_url: &str,
    endpoints: &[String],
    profile: LoadProfile,
) -> String {
    let (executor, body) = profile.scenario();
    let mut s = String::new();
    s.push_str("import http from 'k6/http';\nimport { check } from 'k6';\n\n");
    s.push_str("export const options = {\n  scenarios: {\n");
    let _ = writeln!(s, "    {}_test: {{", profile.kind().as_str());
    let _ = writeln!(s, "      executor: '{executor}',");
    s.push_str(body);
    s.push_str("    },\n  },\n};\n\n");
    let _ = writeln!(s, "// Generated from spec {spec_id}");
    let _ = writeln!(s, "const BASE_URL = {};", js_string(base_url));
    let _ = writeln!(s, "const endpoints = {};\n", js_array(endpoints));
    s.push_str(
        "export default function () {\n  endpoints.forEach((endpoint) => {\n    const res = http.get(BASE_URL + endpoint, { tags: { name: endpoint } });\n    check(res, {\n      'status is 200': (r) => r.status === 200,\n    });\n  });\n}\n",
    );
    s
}

/// Fixed-VU load script used by the automated flow.
pub fn generate_load_script(vus: u32, duration: &str, base_url: &str, endpoints: &[String]) -> String {
    let mut s = String::new();
    s.push_str("import http from 'k6/http';\nimport { check, group } from 'k6';\n\n");
    s.push_str("export const options = {\n");
    let _ = writeln!(s, "  vus: {vus},");
    let _ = writeln!(s, "  duration: {},", js_string(duration));
    s.push_str("  thresholds: {\n    http_req_duration: ['p(95)<500'],\n    http_req_failed: ['rate<0.1'],\n  },\n};\n\n");
    let _ = writeln!(s, "const BASE_URL = {};", js_string(base_url));
    let _ = writeln!(s, "const endpoints = {};\n", js_array(endpoints));
    s.push_str(
        "export default function () {\n  endpoints.forEach((endpoint) => {\n    group('Testing ' + endpoint, () => {\n      const res = http.get(BASE_URL + endpoint, { tags: { name: endpoint } });\n      check(res, {\n        'status is 200': (r) => r.status === 200,\n        'response time < 500ms': (r) => r.timings.duration < 500,\n      });\n    });\n  });\n}\n",
    );
    s
}

/// Single GET against `/`, used by the quick flow. VUs and duration come
/// from the command line.
pub fn health_check_script(base_url: &str) -> String {
    let mut s = String::new();
    s.push_str("import http from 'k6/http';\nimport { check } from 'k6';\n\n");
    let _ = writeln!(s, "const BASE_URL = {};\n", js_string(base_url));
    s.push_str(
        "export default function () {\n  const res = http.get(BASE_URL + '/', { tags: { name: '/' } });\n  check(res, {\n    'status is OK': (r) => r.status < 400,\n  });\n}\n",
    );
    s
}

/// Instruction trigger and the browser action it emits.
struct UiRule {
    matches: fn(&str) -> bool,
    action: &'static str,
}

/// Closed vocabulary, scanned in this order regardless of where the words
/// appear in the instruction text. Anything else produces no action.
const UI_RULES: &[UiRule] = &[
    UiRule {
        matches: |s| s.contains("click") && s.contains("button"),
        action: "await page.locator('button').click();",
    },
    UiRule {
        matches: |s| s.contains("type") || s.contains("enter"),
        action: "await page.locator('input').type('test data');",
    },
    UiRule {
        matches: |s| s.contains("wait"),
        action: "await page.waitForTimeout(1000);",
    },
];

pub fn ui_actions(instructions: &str) -> Vec<&'static str> {
    let lower = instructions.to_lowercase();
    UI_RULES
        .iter()
        .filter(|r| (r.matches)(&lower))
        .map(|r| r.action)
        .collect()
}

pub fn generate_ui_test(url: &str, instructions: &str) -> String {
    let mut s = String::new();
    s.push_str("import { browser } from 'k6/experimental/browser';\nimport { check } from 'k6';\n\n");
    s.push_str(
        "export const options = {\n  scenarios: {\n    browser: {\n      executor: 'shared-iterations',\n      vus: 1,\n      iterations: 1,\n      options: {\n        browser: {\n          type: 'chromium',\n        },\n      },\n    },\n  },\n};\n\n",
    );
    s.push_str("export default async function () {\n  const page = browser.newPage();\n\n  try {\n");
    let _ = writeln!(s, "    await page.goto({});", js_string(url));
    for action in ui_actions(instructions) {
        let _ = writeln!(s, "    {action}");
    }
    s.push_str("  } finally {\n    page.close();\n  }\n}\n");
    s
}

/// Single-quoted JavaScript string literal.
pub fn js_string(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{2028}' => out.push_str("\\u2028"),
            '\u{2029}' => out.push_str("\\u2029"),
            c if (c as u32) < 0x20 => {
                let _ = write!(out, "\\u{:04x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('\'');
    out
}

fn js_array(items: &[String]) -> String {
    let quoted: Vec<String> = items.iter().map(|i| js_string(i)).collect();
    format!("[{}]", quoted.join(", "))
}

/// First `max_chars` characters, never splitting a code point.
pub fn preview(script: &str, max_chars: usize) -> &str {
    match script.char_indices().nth(max_chars) {
        Some((idx, _)) => &script[..idx],
        None => script,
    }
}
