use execution_time::ExecutionTime;
use log::LevelFilter;
use rayon::prelude::*;
use std::process;

use sped_devolucoes_reforma::{
    Agregador, ResultadoExecucao, ResumoValidacao, SpedResult, TabelasCfop, ValidacaoArquivo,
    Validador, clear_screen, get_config, imprimir_estatisticas, imprimir_informacao_segregada,
    imprimir_json, imprimir_relatorio_fiscal, imprimir_resumo_validacao,
    imprimir_versao_do_programa, ler_arquivos_sped, ler_cfops, ler_enriquecimentos, ler_fin_nfe,
    ler_produtos_externos, ler_reducoes_ncm,
};

fn main() {
    // Erros para o usuário final, sem stack trace
    if let Err(err) = run() {
        eprintln!("\n[ERRO CRÍTICO]: {err}");
        process::exit(1);
    }
}

fn iniciar_log(verbose: bool) {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));

    if verbose {
        builder.filter_level(LevelFilter::Debug);
    }

    builder.init();
}

fn run() -> SpedResult<()> {
    let timer = ExecutionTime::start();

    // 1. Obter Configurações
    let config = get_config()?;
    iniciar_log(config.verbose);

    // 2. Setup inicial (a saída JSON não leva cabeçalho)
    if !config.json {
        clear_screen(config.clear)?;
        imprimir_versao_do_programa();
    }

    if config.verbose {
        eprintln!("{:#?}\n", config);
    }

    // 3. Tabelas auxiliares
    let mut tabelas = TabelasCfop::default();
    if let Some(path) = &config.cfops_venda {
        tabelas.estender_venda(ler_cfops(path, config.verbose)?);
    }
    if let Some(path) = &config.cfops_compra {
        tabelas.estender_compra(ler_cfops(path, config.verbose)?);
    }

    let fin_nfe = config
        .fin_nfe
        .as_deref()
        .map(|path| ler_fin_nfe(path, config.verbose))
        .transpose()?
        .unwrap_or_default();

    let enriquecimentos = config
        .participantes
        .as_deref()
        .map(|path| ler_enriquecimentos(path, config.verbose))
        .transpose()?
        .unwrap_or_default();

    let mut parametros = config.parametros.clone();
    if let Some(path) = &config.reducoes_ncm {
        parametros.reducoes_ncm.extend(ler_reducoes_ncm(path, config.verbose)?);
    }

    let produtos_externos = config
        .produtos_saida
        .as_deref()
        .map(|path| ler_produtos_externos(path, config.verbose))
        .transpose()?
        .unwrap_or_default();

    // 4. Decodificação (paralela)
    let lidos = ler_arquivos_sped(&config.arquivos_sped, config.codificacao)?;

    // 5. Validação de devoluções (paralela, um contexto por execução)
    let validador = Validador::new(tabelas, config.opcoes)
        .com_uf_empresa(config.uf_empresa.as_deref())
        .com_fin_nfe(fin_nfe)
        .com_enriquecimentos(enriquecimentos.clone());

    let validacoes: Vec<ResumoValidacao> = lidos
        .par_iter()
        .map(|lido| validador.validar_arquivo(&lido.arquivo))
        .collect();

    // 6. Relatório fiscal
    let relatorio = Agregador::new(parametros, config.selecao.clone())
        .com_enriquecimentos(enriquecimentos)
        .com_produtos_externos(produtos_externos)
        .gerar(lidos.iter().map(|lido| &lido.arquivo));

    // 7. Saída
    if config.json {
        let resultado = ResultadoExecucao {
            arquivos: lidos
                .iter()
                .zip(&validacoes)
                .map(|(lido, validacao)| ValidacaoArquivo {
                    caminho: &lido.caminho,
                    estatisticas: &lido.arquivo.estatisticas,
                    validacao,
                })
                .collect(),
            relatorio: &relatorio,
        };
        return imprimir_json(&resultado);
    }

    for (lido, validacao) in lidos.iter().zip(&validacoes) {
        imprimir_estatisticas(lido);
        imprimir_informacao_segregada(&lido.arquivo, &lido.caminho.display().to_string());
        imprimir_resumo_validacao(validacao, config.verbose);
    }

    imprimir_relatorio_fiscal(&relatorio);

    println!(" Análise concluída com sucesso.\n");
    timer.print_elapsed_time();

    Ok(())
}
