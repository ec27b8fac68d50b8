//! CLI 모듈
//!
//! excelkb-rag CLI 명령어 정의 및 구현

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use crate::embedding::has_api_key;
use crate::knowledge::{
    get_data_dir, BatchPolicy, DocumentMetadata, NewDocument, SearchFilters, SearchMode,
};
use crate::rag::{PromptTier, RagService};

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Parser)]
#[command(name = "excelkb-rag")]
#[command(version, about = "엑셀 지식 RAG 서브시스템", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 엑셀 지식 문서를 지식베이스에 추가
    Ingest {
        /// 직접 입력할 텍스트
        #[arg(short, long)]
        text: Option<String>,

        /// 수집할 텍스트 파일 경로
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// JSON Lines 배치 파일 경로 (행마다 {"content": ..., "source": ...})
        #[arg(short, long)]
        jsonl: Option<PathBuf>,

        /// 출처 태그
        #[arg(short, long)]
        source: Option<String>,

        /// 분류 태그
        #[arg(short, long)]
        category: Option<String>,

        /// 난이도 태그
        #[arg(short, long)]
        difficulty: Option<String>,
    },

    /// 지식베이스 검색
    Query {
        /// 검색 쿼리
        query: String,

        /// 결과 개수 제한
        #[arg(short, long, default_value = "5")]
        limit: usize,

        /// 검색 모드
        #[arg(short, long, value_enum, default_value_t = SearchMode::Hybrid)]
        mode: SearchMode,

        /// 출처 필터
        #[arg(short, long)]
        source: Option<String>,

        /// 함수명 필터 (콘텐츠 부분 일치)
        #[arg(long)]
        function: Option<String>,
    },

    /// RAG 프롬프트 조립 (미리보기)
    Prompt {
        /// 질문
        query: String,

        /// 추가 컨텍스트
        #[arg(short, long, default_value = "")]
        context: String,

        /// 프롬프트 티어
        #[arg(short, long, value_enum, default_value_t = PromptTier::Basic)]
        tier: PromptTier,
    },

    /// 저장소 + 캐시 통계
    Stats,

    /// 오래된 문서 정리
    Cleanup {
        /// 보존 기간 (일)
        #[arg(short, long, default_value = "180")]
        days: i64,
    },

    /// 문서 삭제
    Delete {
        /// 삭제할 문서 ID
        id: i64,
    },

    /// 유지보수 실행 (오래된 문서 + 중복 정리)
    Optimize,
}

// ============================================================================
// CLI Runner
// ============================================================================

/// CLI 명령어 실행
pub async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Ingest {
            text,
            file,
            jsonl,
            source,
            category,
            difficulty,
        } => cmd_ingest(text, file, jsonl, source, category, difficulty).await,
        Commands::Query {
            query,
            limit,
            mode,
            source,
            function,
        } => cmd_query(&query, limit, mode, source, function).await,
        Commands::Prompt {
            query,
            context,
            tier,
        } => cmd_prompt(&query, &context, tier).await,
        Commands::Stats => cmd_stats().await,
        Commands::Cleanup { days } => cmd_cleanup(days).await,
        Commands::Delete { id } => cmd_delete(id).await,
        Commands::Optimize => cmd_optimize().await,
    }
}

/// 서비스 초기화 (API 키 확인 포함)
async fn open_service() -> Result<RagService> {
    if !has_api_key() {
        bail!(
            "API 키가 설정되지 않았습니다.\n\n\
             설정 방법:\n  \
             export GEMINI_API_KEY=your-api-key\n  \
             또는\n  \
             export GOOGLE_AI_API_KEY=your-api-key\n\n\
             API 키 발급: https://aistudio.google.com/app/apikey"
        );
    }
    RagService::open(&get_data_dir()).await
}

// ============================================================================
// Command Implementations
// ============================================================================

/// JSON Lines 배치 파일의 한 행
#[derive(serde::Deserialize)]
struct JsonlItem {
    content: String,
    source: Option<String>,
    category: Option<String>,
    difficulty: Option<String>,
}

/// 문서 수집 명령어 (ingest)
async fn cmd_ingest(
    text: Option<String>,
    file: Option<PathBuf>,
    jsonl: Option<PathBuf>,
    source: Option<String>,
    category: Option<String>,
    difficulty: Option<String>,
) -> Result<()> {
    if let Some(path) = jsonl {
        if text.is_some() || file.is_some() {
            bail!("--jsonl은 --text/--file과 함께 쓸 수 없습니다");
        }
        return cmd_ingest_jsonl(&path).await;
    }

    let content = match (text, file) {
        (Some(t), None) => t,
        (None, Some(path)) => std::fs::read_to_string(&path)
            .with_context(|| format!("파일 읽기 실패: {:?}", path))?,
        (Some(_), Some(_)) => bail!("--text와 --file은 동시에 지정할 수 없습니다"),
        (None, None) => bail!("--text, --file, --jsonl 중 하나를 지정하세요"),
    };

    let service = open_service().await?;

    let metadata = DocumentMetadata {
        source,
        category,
        difficulty,
        ..Default::default()
    };

    let doc = service.index_excel_knowledge(&content, metadata).await?;

    println!("[+] 문서 저장 완료 (id={})", doc.id);
    println!("    토큰 추정: {}", doc.token_count);
    println!(
        "    언어: {}",
        doc.metadata.language.as_deref().unwrap_or("-")
    );
    Ok(())
}

/// JSON Lines 배치 수집
async fn cmd_ingest_jsonl(path: &PathBuf) -> Result<()> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("파일 읽기 실패: {:?}", path))?;

    let mut items = Vec::new();
    for (line_no, line) in raw.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let item: JsonlItem = serde_json::from_str(line)
            .with_context(|| format!("{}번째 행 파싱 실패", line_no + 1))?;
        items.push(NewDocument {
            content: item.content,
            metadata: DocumentMetadata {
                source: item.source,
                category: item.category,
                difficulty: item.difficulty,
                ..Default::default()
            },
        });
    }

    if items.is_empty() {
        bail!("배치 파일에 문서가 없습니다: {:?}", path);
    }

    let service = open_service().await?;
    let total = items.len();
    println!("[*] {}건 배치 수집 시작", total);

    let report = service
        .batch_index_excel_knowledge(items, BatchPolicy::ContinueOnError)
        .await?;

    println!("[+] 저장 {}건 / 실패 {}건", report.stored.len(), report.failures.len());
    for failure in &report.failures {
        println!("    - {}번째 항목: {}", failure.index + 1, failure.error);
    }
    Ok(())
}

/// 검색 명령어 (query)
async fn cmd_query(
    query: &str,
    limit: usize,
    mode: SearchMode,
    source: Option<String>,
    function: Option<String>,
) -> Result<()> {
    let service = open_service().await?;

    let filters = SearchFilters {
        source,
        function_name: function,
        ..Default::default()
    };

    let results = match mode {
        SearchMode::Semantic => service.store().semantic_search_default(query, limit).await?,
        SearchMode::Keyword => service.store().keyword_search(query, limit, &filters)?,
        SearchMode::Hybrid => service.store().hybrid_search(query, limit, &filters).await?,
    };

    if results.is_empty() {
        println!("[!] 검색 결과가 없습니다: {}", query);
        return Ok(());
    }

    println!("[*] {} 모드 검색 결과 {}건:", mode.as_str(), results.len());
    for (i, result) in results.iter().enumerate() {
        let preview: String = result.content.chars().take(80).collect();
        println!(
            "\n{}. [id={}] 스코어 {:.3} ({})",
            i + 1,
            result.doc_id,
            result.score,
            result.search_type.as_str()
        );
        if let Some(src) = &result.metadata.source {
            println!("   출처: {}", src);
        }
        println!("   {}", preview);
    }
    Ok(())
}

/// 프롬프트 미리보기 명령어 (prompt)
async fn cmd_prompt(query: &str, context: &str, tier: PromptTier) -> Result<()> {
    let service = open_service().await?;

    let prompt = service.build_rag_prompt(query, context, &[], tier).await?;

    println!("=== 시스템 프롬프트 ({} 티어) ===", prompt.tier.as_str());
    println!("{}", prompt.system_prompt);
    println!("\n=== 사용자 프롬프트 ===");
    println!("{}", prompt.user_prompt);
    println!("\n=== 요약 ===");
    println!("참고 문서: {}건", prompt.documents_found);
    println!("토큰 추정: {}", prompt.estimated_tokens);
    Ok(())
}

/// 통계 명령어 (stats)
async fn cmd_stats() -> Result<()> {
    let service = open_service().await?;
    let stats = service.get_rag_statistics()?;

    println!("[*] 저장소 통계");
    println!("    전체 문서: {}", stats.store.total_documents);
    println!("    전체 토큰: {}", stats.store.total_tokens);
    println!("    평균 토큰: {:.1}", stats.store.average_tokens);
    println!("    최근 7일: {}", stats.store.recent_documents);
    println!("    출처: {}", stats.store.sources.join(", "));
    println!("    언어: {}", stats.store.languages.join(", "));
    println!("[*] 임베딩 캐시");
    println!(
        "    엔트리: {}/{} (히트 {} / 미스 {})",
        stats.cache.entries, stats.cache.capacity, stats.cache.hits, stats.cache.misses
    );
    Ok(())
}

/// 오래된 문서 정리 명령어 (cleanup)
async fn cmd_cleanup(days: i64) -> Result<()> {
    let service = open_service().await?;

    let removed = service
        .store()
        .cleanup_old_documents(chrono::Duration::days(days))
        .await?;

    println!("[+] {}일 이전 문서 {}건 삭제", days, removed);
    Ok(())
}

/// 문서 삭제 명령어 (delete)
async fn cmd_delete(id: i64) -> Result<()> {
    let service = open_service().await?;
    service.store().delete_document(id).await?;
    println!("[+] 문서 삭제 완료 (id={})", id);
    Ok(())
}

/// 유지보수 명령어 (optimize)
async fn cmd_optimize() -> Result<()> {
    let service = open_service().await?;
    let report = service.optimize_rag_performance().await?;

    println!("[*] 유지보수 완료");
    println!("    이전 문서 수: {}", report.before.total_documents);
    println!("    오래된 문서 삭제: {}", report.removed_old);
    println!("    중복 문서 삭제: {}", report.removed_duplicates);
    println!("    이후 문서 수: {}", report.after.total_documents);
    Ok(())
}
