use regex::Regex;
use std::sync::LazyLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Os {
    Ios,
    Android,
    Windows,
    MacOs,
    Linux,
    Unknown,
}

impl Os {
    pub fn label(self) -> &'static str {
        match self {
            Self::Ios => "iOS",
            Self::Android => "Android",
            Self::Windows => "Windows",
            Self::MacOs => "macOS",
            Self::Linux => "Linux",
            Self::Unknown => "Unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Browser {
    Chrome,
    Firefox,
    Safari,
    Edge,
    Samsung,
    KakaoTalk,
    Naver,
    Opera,
    Unknown,
}

impl Browser {
    pub fn label(self) -> &'static str {
        match self {
            Self::Chrome => "Chrome",
            Self::Firefox => "Firefox",
            Self::Safari => "Safari",
            Self::Edge => "Edge",
            Self::Samsung => "Samsung",
            Self::KakaoTalk => "KakaoTalk",
            Self::Naver => "Naver",
            Self::Opera => "Opera",
            Self::Unknown => "Unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Telemetry {
    pub os: Os,
    pub browser: Browser,
}

type Rules<T> = LazyLock<Vec<(Regex, T)>>;

fn compile<T: Copy>(rules: &[(&str, T)]) -> Vec<(Regex, T)> {
    rules
        .iter()
        .filter_map(|(pattern, value)| Regex::new(pattern).ok().map(|regex| (regex, *value)))
        .collect()
}

static MOBILE_OS: Rules<Os> = LazyLock::new(|| {
    compile(&[
        ("iPad|iPhone|iPod", Os::Ios),
        ("(?i)android", Os::Android),
    ])
});

static DESKTOP_OS: Rules<Os> = LazyLock::new(|| {
    compile(&[
        ("Win", Os::Windows),
        ("Mac", Os::MacOs),
        ("Linux", Os::Linux),
    ])
});

// In-app browsers come first: their user agents also carry the engine name.
static IOS_BROWSERS: Rules<Browser> = LazyLock::new(|| {
    compile(&[
        ("CriOS", Browser::Chrome),
        ("KAKAOTALK", Browser::KakaoTalk),
        ("NAVER", Browser::Naver),
        ("FxiOS", Browser::Firefox),
        ("EdgiOS", Browser::Edge),
        ("Safari", Browser::Safari),
    ])
});

static ANDROID_BROWSERS: Rules<Browser> = LazyLock::new(|| {
    compile(&[
        ("KAKAOTALK", Browser::KakaoTalk),
        ("NAVER", Browser::Naver),
        ("SamsungBrowser", Browser::Samsung),
        ("OPR|Opera", Browser::Opera),
        ("EdgA", Browser::Edge),
        ("Firefox", Browser::Firefox),
        ("Chrome", Browser::Chrome),
    ])
});

static DESKTOP_BROWSERS: Rules<Browser> = LazyLock::new(|| {
    compile(&[
        ("KAKAOTALK", Browser::KakaoTalk),
        ("NAVER", Browser::Naver),
        ("Edg", Browser::Edge),
        ("OPR|Opera", Browser::Opera),
        ("Chrome", Browser::Chrome),
        ("Firefox", Browser::Firefox),
        ("Safari", Browser::Safari),
    ])
});

fn first_match<T: Copy>(rules: &[(Regex, T)], user_agent: &str) -> Option<T> {
    rules
        .iter()
        .find(|(regex, _)| regex.is_match(user_agent))
        .map(|(_, value)| *value)
}

pub fn classify(user_agent: &str) -> Telemetry {
    let os = first_match(&MOBILE_OS, user_agent)
        .or_else(|| first_match(&DESKTOP_OS, user_agent))
        .unwrap_or(Os::Unknown);

    let browser_rules: &[(Regex, Browser)] = match os {
        Os::Ios => &IOS_BROWSERS,
        Os::Android => &ANDROID_BROWSERS,
        _ => &DESKTOP_BROWSERS,
    };
    let browser = first_match(browser_rules, user_agent).unwrap_or(Browser::Unknown);

    Telemetry { os, browser }
}

#[cfg(test)]
mod tests {
    use super::{Browser, Os, classify};

    const IPHONE_SAFARI: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_4 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Mobile/15E148 Safari/604.1";
    const IPHONE_KAKAO: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_4 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Mobile/15E148 KAKAOTALK 10.6.5";
    const IPHONE_CHROME: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_4 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) CriOS/123.0.6312.52 Mobile/15E148 Safari/604.1";
    const ANDROID_SAMSUNG: &str = "Mozilla/5.0 (Linux; Android 14; SM-S918N) AppleWebKit/537.36 (KHTML, like Gecko) SamsungBrowser/24.0 Chrome/117.0.0.0 Mobile Safari/537.36";
    const ANDROID_NAVER: &str = "Mozilla/5.0 (Linux; Android 13; SM-G991N) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Mobile Safari/537.36 NAVER(inapp; search; 1000; 12.3.4)";
    const WINDOWS_EDGE: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36 Edg/122.0.2365.92";
    const WINDOWS_OPERA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36 OPR/108.0.0.0";
    const MAC_SAFARI: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_4) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15";
    const LINUX_FIREFOX: &str = "Mozilla/5.0 (X11; Linux x86_64; rv:124.0) Gecko/20100101 Firefox/124.0";

    #[test]
    fn mobile_os_wins_over_desktop_tokens() {
        // iPhone user agents also say "Mac OS X"; Android ones also say "Linux".
        assert_eq!(classify(IPHONE_SAFARI).os, Os::Ios);
        assert_eq!(classify(ANDROID_SAMSUNG).os, Os::Android);
    }

    #[test]
    fn in_app_browsers_are_checked_first() {
        assert_eq!(classify(IPHONE_KAKAO).browser, Browser::KakaoTalk);
        assert_eq!(classify(ANDROID_NAVER).browser, Browser::Naver);
        assert_eq!(classify(ANDROID_SAMSUNG).browser, Browser::Samsung);
    }

    #[test]
    fn ios_chrome_is_not_reported_as_safari() {
        assert_eq!(classify(IPHONE_CHROME).browser, Browser::Chrome);
        assert_eq!(classify(IPHONE_SAFARI).browser, Browser::Safari);
    }

    #[test]
    fn desktop_engines_resolve_in_order() {
        let edge = classify(WINDOWS_EDGE);
        assert_eq!((edge.os, edge.browser), (Os::Windows, Browser::Edge));

        let opera = classify(WINDOWS_OPERA);
        assert_eq!(opera.browser, Browser::Opera);

        let safari = classify(MAC_SAFARI);
        assert_eq!((safari.os, safari.browser), (Os::MacOs, Browser::Safari));

        let firefox = classify(LINUX_FIREFOX);
        assert_eq!((firefox.os, firefox.browser), (Os::Linux, Browser::Firefox));
    }

    #[test]
    fn unmatched_user_agent_is_unknown() {
        let telemetry = classify("curl/8.5.0");
        assert_eq!(telemetry.os, Os::Unknown);
        assert_eq!(telemetry.browser, Browser::Unknown);
        assert_eq!(telemetry.os.label(), "Unknown");
        assert_eq!(classify("").browser.label(), "Unknown");
    }
}
