use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tumblr_archiver::accumulator::{
    AccumulateError, AccumulatorOptions, FetchError, ImageAccumulator, OvershootPolicy, PostSource,
    StopReason,
};
use tumblr_archiver::model::{Photo, PhotoSize, PostKind, PostPage, RawPost, ResponseMeta};
use tumblr_archiver::pagination::{Cursor, Mode, PageRequest, PaginationState};
use tumblr_archiver::progress::{NoProgress, ProgressObserver};

fn photo_post(id: u64, photos: usize, ts: i64) -> RawPost {
    RawPost {
        id: id.to_string(),
        blog_name: "source".into(),
        post_url: format!("https://source.tumblr.com/post/{}", id),
        kind: PostKind::Photo,
        timestamp: ts - 1000,
        liked_timestamp: Some(ts),
        photos: (0..photos)
            .map(|n| Photo {
                caption: String::new(),
                original_size: Some(PhotoSize {
                    url: format!("https://64.media.tumblr.com/{}/{}.jpg", id, n),
                    width: 100,
                    height: 100,
                }),
                alt_sizes: Vec::new(),
            })
            .collect(),
        ..Default::default()
    }
}

fn text_post(id: u64, ts: i64) -> RawPost {
    RawPost {
        id: id.to_string(),
        kind: PostKind::Text,
        timestamp: ts,
        body: Some("<p>no pictures here</p>".into()),
        ..Default::default()
    }
}

/// A page of `count` posts, each with `photos` images, timestamps counting
/// down from `start_ts`.
fn page(first_id: u64, count: usize, photos: usize, start_ts: i64) -> PostPage {
    PostPage {
        posts: (0..count)
            .map(|i| photo_post(first_id + i as u64, photos, start_ts - i as i64))
            .collect(),
        total_count: Some(5000),
        meta: ResponseMeta {
            status: 200,
            message: "OK".into(),
        },
    }
}

#[derive(Clone, Default)]
struct RecordingSource {
    responses: Arc<Mutex<VecDeque<Result<PostPage, FetchError>>>>,
    requests: Arc<Mutex<Vec<PageRequest>>>,
}

impl RecordingSource {
    fn with_responses(responses: Vec<Result<PostPage, FetchError>>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(VecDeque::from(responses))),
            ..Default::default()
        }
    }

    fn requests(&self) -> Vec<PageRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl PostSource for RecordingSource {
    async fn fetch_page(
        &self,
        _identifier: &str,
        request: &PageRequest,
    ) -> Result<PostPage, FetchError> {
        self.requests.lock().unwrap().push(*request);
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(PostPage::default()))
    }
}

#[derive(Default)]
struct RecordingProgress {
    calls: Mutex<Vec<(usize, usize)>>,
}

impl ProgressObserver for RecordingProgress {
    fn on_progress(&self, current: usize, total: usize) {
        self.calls.lock().unwrap().push((current, total));
    }
}

fn options(target: usize) -> AccumulatorOptions {
    AccumulatorOptions {
        target_count: target,
        ..AccumulatorOptions::default()
    }
}

#[tokio::test]
async fn keeps_whole_final_page_by_default() {
    // 20 posts x 3 photos = 60 images per page; target 50 is met on page one.
    let source = RecordingSource::with_responses(vec![Ok(page(1, 20, 3, 10_000))]);
    let acc = ImageAccumulator::new(&source, options(50))
        .run("blog", PaginationState::new(), &CancellationToken::new(), &NoProgress)
        .await
        .unwrap();

    assert_eq!(acc.items.len(), 60);
    assert_eq!(acc.stop, StopReason::TargetReached);
    assert_eq!(acc.pages_fetched, 1);
    assert_eq!(acc.state.offset(), Some(20));
    assert_eq!(acc.total_source_count, Some(5000));
}

#[tokio::test]
async fn truncate_policy_returns_exactly_target() {
    let source = RecordingSource::with_responses(vec![Ok(page(1, 20, 3, 10_000))]);
    let opts = AccumulatorOptions {
        overshoot: OvershootPolicy::Truncate,
        ..options(50)
    };
    let acc = ImageAccumulator::new(&source, opts)
        .run("blog", PaginationState::new(), &CancellationToken::new(), &NoProgress)
        .await
        .unwrap();

    assert_eq!(acc.items.len(), 50);
    assert_eq!(acc.items[0].id, "1-img-0");
    assert_eq!(acc.items[49].id, "17-img-1");
}

#[tokio::test]
async fn items_keep_page_then_post_order() {
    let source = RecordingSource::with_responses(vec![
        Ok(page(1, 20, 1, 10_000)),
        Ok(page(21, 20, 1, 9_000)),
    ]);
    let acc = ImageAccumulator::new(&source, options(40))
        .run("blog", PaginationState::new(), &CancellationToken::new(), &NoProgress)
        .await
        .unwrap();

    let ids: Vec<String> = acc.items.iter().map(|i| i.source_item_id.clone()).collect();
    let expected: Vec<String> = (1..=40).map(|n: u64| n.to_string()).collect();
    assert_eq!(ids, expected);
    assert_eq!(
        source.requests().iter().map(|r| r.offset()).collect::<Vec<_>>(),
        vec![Some(0), Some(20)]
    );
}

#[tokio::test]
async fn stops_when_listing_is_exhausted() {
    let mut short = page(21, 5, 1, 9_000);
    short.posts.push(text_post(99, 8_000));
    let source = RecordingSource::with_responses(vec![Ok(page(1, 20, 1, 10_000)), Ok(short)]);
    let acc = ImageAccumulator::new(&source, options(500))
        .run("blog", PaginationState::new(), &CancellationToken::new(), &NoProgress)
        .await
        .unwrap();

    assert_eq!(acc.items.len(), 25);
    assert_eq!(acc.stop, StopReason::Exhausted);
    assert!(!acc.state.has_more());
    assert_eq!(source.requests().len(), 2);
}

#[tokio::test]
async fn empty_page_ends_the_walk() {
    let source = RecordingSource::with_responses(vec![Ok(PostPage::default())]);
    let acc = ImageAccumulator::new(&source, options(10))
        .run("blog", PaginationState::new(), &CancellationToken::new(), &NoProgress)
        .await
        .unwrap();

    assert!(acc.items.is_empty());
    assert_eq!(acc.stop, StopReason::Exhausted);
    assert_eq!(acc.pages_fetched, 1);
}

#[tokio::test]
async fn crosses_the_offset_ceiling_with_timestamps() {
    // Start near the ceiling so the third page must use `before`.
    let start = PaginationState::at_offset(960).unwrap();
    let source = RecordingSource::with_responses(vec![
        Ok(page(1, 20, 1, 50_000)),
        Ok(page(21, 20, 1, 40_000)),
        Ok(page(41, 20, 1, 30_000)),
    ]);
    let acc = ImageAccumulator::new(&source, options(60))
        .run("blog", start, &CancellationToken::new(), &NoProgress)
        .await
        .unwrap();

    let cursors: Vec<Cursor> = source.requests().iter().map(|r| r.cursor).collect();
    assert_eq!(
        cursors,
        vec![
            Cursor::Offset(960),
            Cursor::Offset(980),
            // last liked_timestamp of the second page
            Cursor::BeforeTimestamp(40_000 - 19),
        ]
    );
    assert_eq!(acc.items.len(), 60);
    assert_eq!(acc.state.mode(), Mode::BeforeTimestamp);
    assert_eq!(acc.state.before_timestamp(), Some(30_000 - 19));
    assert!(acc.state.reached_offset_ceiling());
}

#[tokio::test]
async fn fetch_error_returns_partial_result() {
    let source = RecordingSource::with_responses(vec![
        Ok(page(1, 20, 1, 10_000)),
        Err(FetchError::RateLimited {
            retry_after: None,
            message: "Limit Exceeded".into(),
        }),
    ]);
    let err = ImageAccumulator::new(&source, options(100))
        .run("blog", PaginationState::new(), &CancellationToken::new(), &NoProgress)
        .await
        .unwrap_err();

    match &err {
        AccumulateError::Interrupted { partial, source } => {
            assert_eq!(partial.items.len(), 20);
            assert_eq!(partial.state.offset(), Some(20));
            assert!(matches!(source, FetchError::RateLimited { .. }));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(err.partial().map(|p| p.pages_fetched), Some(1));
}

#[tokio::test]
async fn authorization_error_on_first_page_keeps_nothing() {
    let source = RecordingSource::with_responses(vec![Err(FetchError::Authorization {
        message: "Forbidden".into(),
    })]);
    let err = ImageAccumulator::new(&source, options(10))
        .run("blog", PaginationState::new(), &CancellationToken::new(), &NoProgress)
        .await
        .unwrap_err();
    let partial = err.partial().unwrap();
    assert!(partial.items.is_empty());
    assert!(err.to_string().contains("Forbidden"));
}

#[tokio::test]
async fn iteration_cap_stops_runaway_walks() {
    let responses = (0..10)
        .map(|n| Ok(PostPage {
            posts: (0..20).map(|i| text_post(n * 20 + i, 100_000 - (n * 20 + i) as i64)).collect(),
            total_count: None,
            meta: ResponseMeta::default(),
        }))
        .collect();
    let source = RecordingSource::with_responses(responses);
    let opts = AccumulatorOptions {
        max_iterations: 3,
        ..options(10)
    };
    let acc = ImageAccumulator::new(&source, opts)
        .run("blog", PaginationState::new(), &CancellationToken::new(), &NoProgress)
        .await
        .unwrap();

    assert!(acc.items.is_empty());
    assert_eq!(acc.stop, StopReason::SafetyCap);
    assert_eq!(source.requests().len(), 3);
}

#[tokio::test]
async fn cancelled_token_fetches_nothing() {
    let source = RecordingSource::with_responses(vec![Ok(page(1, 20, 1, 10_000))]);
    let cancel = CancellationToken::new();
    cancel.cancel();
    let acc = ImageAccumulator::new(&source, options(10))
        .run("blog", PaginationState::new(), &cancel, &NoProgress)
        .await
        .unwrap();
    assert_eq!(acc.stop, StopReason::Cancelled);
    assert!(source.requests().is_empty());
}

#[tokio::test]
async fn reports_progress_after_each_page() {
    let source = RecordingSource::with_responses(vec![
        Ok(page(1, 20, 1, 10_000)),
        Ok(page(21, 20, 2, 9_000)),
    ]);
    let progress = RecordingProgress::default();
    ImageAccumulator::new(&source, options(50))
        .run("blog", PaginationState::new(), &CancellationToken::new(), &progress)
        .await
        .unwrap();
    assert_eq!(*progress.calls.lock().unwrap(), vec![(20, 50), (60, 50)]);
}

#[tokio::test]
async fn zero_target_is_rejected() {
    let source = RecordingSource::default();
    let err = ImageAccumulator::new(&source, options(0))
        .run("blog", PaginationState::new(), &CancellationToken::new(), &NoProgress)
        .await
        .unwrap_err();
    assert!(matches!(err, AccumulateError::InvalidPagination(_)));
    assert!(source.requests().is_empty());
}

#[tokio::test]
async fn truncated_images_are_delivered_by_the_resumed_walk() {
    // 20 posts x 3 photos per page; target 50 cuts ten images off each page.
    let source = RecordingSource::with_responses(vec![
        Ok(page(1, 20, 3, 10_000)),
        Ok(page(21, 20, 3, 9_000)),
    ]);
    let opts = AccumulatorOptions {
        overshoot: OvershootPolicy::Truncate,
        ..options(50)
    };
    let accumulator = ImageAccumulator::new(&source, opts);
    let cancel = CancellationToken::new();

    let first = accumulator
        .run("blog", PaginationState::new(), &cancel, &NoProgress)
        .await
        .unwrap();
    assert_eq!(first.items.len(), 50);
    assert_eq!(first.overflow.len(), 10);
    assert_eq!(first.overflow[0].id, "17-img-2");

    let second = accumulator
        .run_from("blog", first.state, first.overflow.clone(), &cancel, &NoProgress)
        .await
        .unwrap();
    assert_eq!(second.items.len(), 50);
    assert_eq!(second.items[0].id, "17-img-2");
    assert_eq!(second.overflow.len(), 20);

    let mut seen: Vec<String> = first
        .items
        .iter()
        .chain(&second.items)
        .chain(&second.overflow)
        .map(|item| item.id.clone())
        .collect();
    assert_eq!(seen.len(), 120);
    seen.sort();
    seen.dedup();
    assert_eq!(seen.len(), 120, "every image delivered exactly once");
    assert_eq!(
        source.requests().iter().map(|r| r.offset()).collect::<Vec<_>>(),
        vec![Some(0), Some(20)]
    );
}

#[tokio::test]
async fn pending_images_alone_can_meet_the_target() {
    let source = RecordingSource::default();
    let pending = ImageAccumulator::new(
        &RecordingSource::with_responses(vec![Ok(page(1, 5, 2, 10_000))]),
        options(100),
    )
    .run("blog", PaginationState::new(), &CancellationToken::new(), &NoProgress)
    .await
    .unwrap()
    .items;
    assert_eq!(pending.len(), 10);

    let acc = ImageAccumulator::new(&source, options(5))
        .run_from(
            "blog",
            PaginationState::at_offset(20).unwrap(),
            pending,
            &CancellationToken::new(),
            &NoProgress,
        )
        .await
        .unwrap();
    assert_eq!(acc.items.len(), 10);
    assert_eq!(acc.stop, StopReason::TargetReached);
    assert!(source.requests().is_empty());
}

#[tokio::test]
async fn item_cap_stops_the_walk() {
    let source = RecordingSource::with_responses(vec![
        Ok(page(1, 20, 1, 10_000)),
        Ok(page(21, 20, 1, 9_000)),
        Ok(page(41, 20, 1, 8_000)),
    ]);
    let opts = AccumulatorOptions {
        max_items: 25,
        ..options(100)
    };
    let acc = ImageAccumulator::new(&source, opts)
        .run("blog", PaginationState::new(), &CancellationToken::new(), &NoProgress)
        .await
        .unwrap();

    assert_eq!(acc.stop, StopReason::SafetyCap);
    assert_eq!(acc.items.len(), 40);
    assert_eq!(source.requests().len(), 2);
    assert!(acc.state.has_more());
}
