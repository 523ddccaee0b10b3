use sieve_script::BrowserAction;
use sieve_types::Result;

use super::{session, Environment};
use crate::browser::LaunchOptions;
use crate::context::ExecutionContext;
use crate::cookies::Cookie;

pub(super) async fn run(action: BrowserAction, ctx: &mut ExecutionContext, env: &Environment) -> Result<()> {
    match action {
        BrowserAction::Open => {
            ctx.release().await;
            let proxy = ctx.use_proxy.then(|| ctx.proxy().as_ref());
            let options = LaunchOptions::from_settings(&env.settings.browser, proxy);
            let session = env.browser.launch(&options).await?;
            ctx.browser = Some(session);
        }
        BrowserAction::Close => {
            if let Some(mut session) = ctx.browser.take() {
                session.close().await?;
            }
        }
        BrowserAction::ClearCookies => session(ctx, "clearCookies")?.clear_cookies().await?,
        BrowserAction::GetCookies => {
            let cookies = session(ctx, "getCookies")?.cookies().await?;
            for cookie in cookies {
                ctx.cookies.insert(cookie);
            }
        }
        BrowserAction::SetCookies => {
            let cookies: Vec<Cookie> = ctx.cookies.iter().collect();
            session(ctx, "setCookies")?.set_cookies(&cookies).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::fake::FakeBrowser;
    use crate::context::BotInput;
    use crate::operations::UserAgents;
    use crate::proxy::{ProxyEntry, ProxyScheme};
    use crate::transport::{HttpRequest, HttpResponse, Transport};
    use async_trait::async_trait;
    use sieve_types::{RunSettings, SieveError};
    use std::sync::Arc;
    use url::Url;

    struct NoTransport;

    #[async_trait]
    impl Transport for NoTransport {
        async fn send(&self, _: HttpRequest, _: Option<&ProxyEntry>, _: bool) -> Result<HttpResponse> {
            unreachable!("browser actions never send")
        }
    }

    fn env(browser: &FakeBrowser) -> Environment {
        Environment {
            transport: Arc::new(NoTransport),
            browser: Arc::new(browser.clone()),
            settings: Arc::new(RunSettings::default()),
            user_agents: Arc::new(UserAgents::default()),
        }
    }

    fn ctx(use_proxy: bool) -> ExecutionContext {
        let proxy = Arc::new(ProxyEntry::new("10.0.0.9", 8080, ProxyScheme::Http));
        ExecutionContext::new(BotInput::new("a:b"), proxy, use_proxy, &[])
    }

    #[tokio::test]
    async fn open_routes_through_proxy_when_enabled() {
        let fake = FakeBrowser::default();
        let env = env(&fake);

        let mut c = ctx(true);
        run(BrowserAction::Open, &mut c, &env).await.unwrap();
        assert!(c.browser.is_some());

        let mut direct = ctx(false);
        run(BrowserAction::Open, &mut direct, &env).await.unwrap();

        let launches = fake.launches.lock().unwrap();
        assert_eq!(launches[0].proxy.as_deref(), Some("http://10.0.0.9:8080"));
        assert_eq!(launches[1].proxy, None);
    }

    #[tokio::test]
    async fn close_releases_session() {
        let fake = FakeBrowser::default();
        let env = env(&fake);
        let mut c = ctx(false);
        run(BrowserAction::Open, &mut c, &env).await.unwrap();
        run(BrowserAction::Close, &mut c, &env).await.unwrap();
        assert!(c.browser.is_none());
        assert_eq!(fake.calls(), vec!["close".to_string()]);
    }

    #[tokio::test]
    async fn cookies_move_between_jar_and_browser() {
        let fake = FakeBrowser::default();
        let env = env(&fake);
        let mut c = ctx(false);
        run(BrowserAction::Open, &mut c, &env).await.unwrap();

        let url = Url::parse("https://shop.test/").unwrap();
        c.cookies.insert_pair(&url, "cart=3");
        run(BrowserAction::SetCookies, &mut c, &env).await.unwrap();
        assert_eq!(fake.cookies.lock().unwrap().len(), 1);

        fake.cookies.lock().unwrap().push(Cookie {
            name: "sid".into(),
            value: "zz".into(),
            domain: "shop.test".into(),
            path: "/".into(),
        });
        run(BrowserAction::GetCookies, &mut c, &env).await.unwrap();
        assert_eq!(c.cookies.header_for(&url).as_deref(), Some("cart=3; sid=zz"));

        run(BrowserAction::ClearCookies, &mut c, &env).await.unwrap();
        assert!(fake.cookies.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn actions_need_an_open_browser() {
        let fake = FakeBrowser::default();
        let env = env(&fake);
        let mut c = ctx(false);
        let err = run(BrowserAction::GetCookies, &mut c, &env).await.unwrap_err();
        assert!(matches!(err, SieveError::Browser { .. }));
        run(BrowserAction::Close, &mut c, &env).await.unwrap();
    }
}
